// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 流水线配置 - 通过JSON文件调整参数

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::models::{EngineConfig, EngineKind};
use crate::pipeline::SwitchSettings;

/// 流水线参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // === 分发参数 ===
    pub decimation: u32, // 每N帧处理一帧
    pub top_k: usize,    // 每帧写入日志的事件数

    // === 切换参数 ===
    pub drain_timeout_ms: u64, // 排空超时
    pub drain_poll_ms: u64,    // 排空轮询间隔

    // === 日志与状态 ===
    pub event_log_capacity: usize, // 事件日志容量
    pub status_capacity: usize,    // 每个状态订阅者的缓冲

    // === 引擎参数 ===
    pub detector: EngineConfig,
    pub segmenter: EngineConfig,
    pub classifier: EngineConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decimation: 1,
            top_k: 5,

            drain_timeout_ms: 1000,
            drain_poll_ms: 10,

            event_log_capacity: crate::detection::DEFAULT_CAPACITY,
            status_capacity: 256,

            detector: EngineConfig::for_kind(EngineKind::Detector),
            segmenter: EngineConfig::for_kind(EngineKind::Segmenter),
            classifier: EngineConfig::for_kind(EngineKind::Classifier),
        }
    }
}

impl PipelineConfig {
    /// 从JSON文件加载配置;解析失败用默认值,文件不存在时写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<Self>(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config.sanitized()
                }
                Err(e) => {
                    warn!("⚠️ 配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    error!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => error!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 把越界的值收回合法范围
    pub fn sanitized(mut self) -> Self {
        self.decimation = self.decimation.max(1);
        self.drain_poll_ms = self.drain_poll_ms.clamp(1, 1000);
        self.drain_timeout_ms = self.drain_timeout_ms.max(self.drain_poll_ms);
        self.event_log_capacity = self.event_log_capacity.max(1);
        self.status_capacity = self.status_capacity.max(1);

        for (kind, engine) in [
            (EngineKind::Detector, &mut self.detector),
            (EngineKind::Segmenter, &mut self.segmenter),
            (EngineKind::Classifier, &mut self.classifier),
        ] {
            engine.kind = kind;
            engine.conf_threshold = engine.conf_threshold.clamp(0.0, 1.0);
            engine.iou_threshold = engine.iou_threshold.clamp(0.0, 1.0);
            engine.num_classes = engine.num_classes.max(1);
        }
        self
    }

    pub fn engine(&self, kind: EngineKind) -> &EngineConfig {
        match kind {
            EngineKind::Detector => &self.detector,
            EngineKind::Segmenter => &self.segmenter,
            EngineKind::Classifier => &self.classifier,
        }
    }

    pub fn switch_settings(&self) -> SwitchSettings {
        SwitchSettings {
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            drain_poll: Duration::from_millis(self.drain_poll_ms),
        }
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        println!("\n🎛️  当前流水线配置:");
        println!("  抽帧间隔: 每 {} 帧处理 1 帧", self.decimation);
        println!("  每帧事件数: top{}", self.top_k);
        println!(
            "  排空超时: {}ms (轮询 {}ms)",
            self.drain_timeout_ms, self.drain_poll_ms
        );
        println!("  事件日志容量: {}", self.event_log_capacity);
        for kind in EngineKind::ALL {
            let engine = self.engine(kind);
            println!(
                "  {}: conf={:.2} iou={:.2} classes={}",
                kind.label(),
                engine.conf_threshold,
                engine.iou_threshold,
                engine.num_classes
            );
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");

        let config = PipelineConfig::load(&path);
        assert_eq!(config, PipelineConfig::default());
        assert!(path.is_file());
        assert_eq!(PipelineConfig::load(&path), config);
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(PipelineConfig::load(&path), PipelineConfig::default());
    }

    #[test]
    fn partial_file_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        fs::write(
            &path,
            r#"{"decimation":0,"drain_poll_ms":0,"classifier":{"kind":"detector","conf_threshold":3.0}}"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path);
        assert_eq!(config.decimation, 1);
        assert_eq!(config.drain_poll_ms, 1);
        assert_eq!(config.drain_timeout_ms, 1000);
        assert_eq!(config.classifier.kind, EngineKind::Classifier);
        assert_eq!(config.classifier.conf_threshold, 1.0);
        assert_eq!(config.top_k, 5);
    }

    #[test]
    fn switch_settings_follow_config() {
        let config = PipelineConfig {
            drain_timeout_ms: 250,
            drain_poll_ms: 5,
            ..PipelineConfig::default()
        };
        let settings = config.switch_settings();
        assert_eq!(settings.drain_timeout, Duration::from_millis(250));
        assert_eq!(settings.drain_poll, Duration::from_millis(5));
        assert_eq!(config.engine(EngineKind::Segmenter).kind, EngineKind::Segmenter);
    }
}
