// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 推理引擎统一接口与实现
///
/// # 架构说明
///
/// ## EngineHandle
/// 每个推理后端实现一次的能力集: `init` → `infer` (逐帧) → `release`
/// - 同一时刻只有一个引擎处于激活状态
/// - 新引擎初始化前,旧引擎必须已完全释放 (独占加速器资源)
/// - 后端不保证 `infer` 与 `release` 可并发调用
///
/// ## EngineFactory
/// 切换协调器通过工厂按 `EngineKind` 创建新引擎
///
/// ## 内置合成后端
/// - **BrightRegionDetector**: 网格亮区检测 (Detector / Segmenter)
/// - **LumaClassifier**:       亮度直方图分类 (Classifier)
///
/// ## 使用示例
/// ```rust
/// use livedet::models::{BuiltinEngines, EngineConfig, EngineFactory, EngineHandle, EngineKind};
///
/// let mut engine = BuiltinEngines.create(EngineKind::Classifier);
/// engine.init(&EngineConfig::for_kind(EngineKind::Classifier)).unwrap();
/// assert!(engine.is_ready());
/// engine.release();
/// ```
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::detection::InferenceOutput;
use crate::input::Frame;

pub mod bright_region;
pub mod luma;

pub use bright_region::BrightRegionDetector;
pub use luma::LumaClassifier;

/// 引擎类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// YOLOv8 检测
    #[default]
    Detector,
    /// YOLOv11n-seg 分割 (只输出检测框)
    Segmenter,
    /// ResNet-50 分类
    Classifier,
}

impl EngineKind {
    pub const ALL: [EngineKind; 3] = [
        EngineKind::Detector,
        EngineKind::Segmenter,
        EngineKind::Classifier,
    ];

    /// 从名称解析 (不区分大小写)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "detector" | "detect" | "yolo" | "yolov8" => Some(EngineKind::Detector),
            "segmenter" | "seg" | "yoloseg" | "yolov11-seg" => Some(EngineKind::Segmenter),
            "classifier" | "cls" | "resnet" | "resnet50" => Some(EngineKind::Classifier),
            _ => None,
        }
    }

    /// 界面显示名称
    pub fn label(&self) -> &'static str {
        match self {
            EngineKind::Detector => "YOLOv8 (detector)",
            EngineKind::Segmenter => "YOLOv11n-seg (segmentation)",
            EngineKind::Classifier => "ResNet-50 (classifier)",
        }
    }

    /// 默认模型文件 (param, bin)
    pub fn default_model_files(&self) -> (&'static str, &'static str) {
        match self {
            EngineKind::Detector => ("yolov8n.param", "yolov8n.bin"),
            EngineKind::Segmenter => ("yolov11n-seg.param", "yolov11n-seg.bin"),
            EngineKind::Classifier => ("resnet50.param", "resnet50.bin"),
        }
    }

    /// 循环切换到下一个引擎类型
    pub fn next(&self) -> Self {
        match self {
            EngineKind::Detector => EngineKind::Segmenter,
            EngineKind::Segmenter => EngineKind::Classifier,
            EngineKind::Classifier => EngineKind::Detector,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineKind::Detector => "detector",
            EngineKind::Segmenter => "segmenter",
            EngineKind::Classifier => "classifier",
        };
        f.write_str(name)
    }
}

/// 引擎初始化参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    pub param_path: Option<PathBuf>, // 模型结构文件
    pub bin_path: Option<PathBuf>,   // 模型权重文件
    pub conf_threshold: f32,         // 置信度阈值
    pub iou_threshold: f32,          // NMS IOU阈值
    pub top_k: usize,                // 分类Top-K
    pub num_classes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_kind(EngineKind::Detector)
    }
}

impl EngineConfig {
    pub fn for_kind(kind: EngineKind) -> Self {
        Self {
            kind,
            param_path: None,
            bin_path: None,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            top_k: 5,
            num_classes: 80,
        }
    }

    /// 指向模型目录下的默认模型文件
    pub fn with_model_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let (param, bin) = self.kind.default_model_files();
        self.param_path = Some(dir.as_ref().join(param));
        self.bin_path = Some(dir.as_ref().join(bin));
        self
    }

    /// 检查配置的模型文件是否存在
    pub fn check_model_files(&self) -> Result<()> {
        for path in [&self.param_path, &self.bin_path].into_iter().flatten() {
            if !path.is_file() {
                bail!("model file not found: {}", path.display());
            }
        }
        if !(0.0..=1.0).contains(&self.conf_threshold) {
            bail!("confidence threshold {} out of range", self.conf_threshold);
        }
        if self.num_classes == 0 {
            bail!("num_classes must be positive");
        }
        Ok(())
    }
}

/// 推理引擎能力集
pub trait EngineHandle: Send {
    fn kind(&self) -> EngineKind;

    /// 加载模型;失败时引擎保持不可用
    fn init(&mut self, config: &EngineConfig) -> Result<()>;

    /// 单帧推理 (在投递线程上同步执行)
    fn infer(&mut self, frame: &Frame) -> Result<InferenceOutput>;

    /// 释放模型资源;可重复调用
    fn release(&mut self);

    fn is_ready(&self) -> bool;
}

/// 引擎工厂 (切换协调器用来创建新引擎)
pub trait EngineFactory: Send + Sync {
    fn create(&self, kind: EngineKind) -> Box<dyn EngineHandle>;
}

/// 内置合成引擎
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEngines;

impl EngineFactory for BuiltinEngines {
    fn create(&self, kind: EngineKind) -> Box<dyn EngineHandle> {
        match kind {
            EngineKind::Detector => Box::new(BrightRegionDetector::new(kind, 8)),
            EngineKind::Segmenter => Box::new(BrightRegionDetector::new(kind, 16)),
            EngineKind::Classifier => Box::new(LumaClassifier::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_cycle_kinds() {
        assert_eq!(EngineKind::parse("ResNet"), Some(EngineKind::Classifier));
        assert_eq!(EngineKind::parse(" seg "), Some(EngineKind::Segmenter));
        assert_eq!(EngineKind::parse("nope"), None);
        let mut kind = EngineKind::Detector;
        for _ in 0..3 {
            kind = kind.next();
        }
        assert_eq!(kind, EngineKind::Detector);
    }

    #[test]
    fn missing_model_files_fail_check() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::for_kind(EngineKind::Segmenter).with_model_dir(dir.path());
        assert!(config.check_model_files().is_err());

        std::fs::write(dir.path().join("yolov11n-seg.param"), "").unwrap();
        std::fs::write(dir.path().join("yolov11n-seg.bin"), "").unwrap();
        assert!(config.check_model_files().is_ok());
    }

    #[test]
    fn factory_builds_requested_kind() {
        for kind in EngineKind::ALL {
            let engine = BuiltinEngines.create(kind);
            assert_eq!(engine.kind(), kind);
            assert!(!engine.is_ready());
        }
    }

    #[test]
    fn config_roundtrips_through_json() {
        let json = r#"{"kind":"classifier","top_k":3}"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind, EngineKind::Classifier);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.iou_threshold, 0.45);
    }
}
