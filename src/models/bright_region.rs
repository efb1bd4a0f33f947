// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 网格亮区检测器 (合成后端)
//!
//! 把画面划分为 grid×grid 的单元格,平均亮度超过置信度阈值的单元格输出为
//! 检测框,类别取主导颜色通道 (0=R, 1=G, 2=B)。

use anyhow::Result;
use tracing::{debug, info};

use super::{EngineConfig, EngineHandle, EngineKind};
use crate::detection::{non_max_suppression, BBox, InferenceOutput};
use crate::error::EngineError;
use crate::input::Frame;

/// 每个单元格每个方向最多采样的像素数
const SAMPLES_PER_AXIS: u32 = 8;

pub struct BrightRegionDetector {
    kind: EngineKind,
    grid: u32,
    config: Option<EngineConfig>,
}

impl BrightRegionDetector {
    pub fn new(kind: EngineKind, grid: u32) -> Self {
        Self {
            kind,
            grid: grid.max(1),
            config: None,
        }
    }

    fn scan_cell(frame: &Frame, x0: u32, y0: u32, x1: u32, y1: u32) -> Option<(f32, usize)> {
        let step_x = ((x1 - x0) / SAMPLES_PER_AXIS).max(1);
        let step_y = ((y1 - y0) / SAMPLES_PER_AXIS).max(1);

        let mut sum = [0f32; 3];
        let mut n = 0f32;
        for y in (y0..y1).step_by(step_y as usize) {
            for x in (x0..x1).step_by(step_x as usize) {
                let p = frame.pixel(x, y)?;
                sum[0] += p[0] as f32;
                sum[1] += p[1] as f32;
                sum[2] += p[2] as f32;
                n += 1.0;
            }
        }
        if n == 0.0 {
            return None;
        }

        let mean = [sum[0] / n, sum[1] / n, sum[2] / n];
        let luma = 0.299 * mean[0] + 0.587 * mean[1] + 0.114 * mean[2];
        let dominant = (0..3)
            .max_by(|&a, &b| mean[a].total_cmp(&mean[b]))
            .unwrap_or(0);
        Some((luma / 255.0, dominant))
    }
}

impl EngineHandle for BrightRegionDetector {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn init(&mut self, config: &EngineConfig) -> Result<()> {
        config.check_model_files()?;
        self.config = Some(config.clone());
        info!(
            "✅ {} 加载成功 (grid={} conf={:.2} iou={:.2})",
            self.kind.label(),
            self.grid,
            config.conf_threshold,
            config.iou_threshold
        );
        Ok(())
    }

    fn infer(&mut self, frame: &Frame) -> Result<InferenceOutput> {
        let config = self
            .config
            .as_ref()
            .ok_or(EngineError::NotInitialized(self.kind))?;
        frame.validate()?;

        let (w, h) = (frame.width(), frame.height());
        let cell_w = w.div_ceil(self.grid).max(1);
        let cell_h = h.div_ceil(self.grid).max(1);

        let mut boxes = Vec::new();
        for gy in 0..self.grid {
            for gx in 0..self.grid {
                let (x0, y0) = (gx * cell_w, gy * cell_h);
                if x0 >= w || y0 >= h {
                    continue;
                }
                let (x1, y1) = ((x0 + cell_w).min(w), (y0 + cell_h).min(h));
                let Some((score, dominant)) = Self::scan_cell(frame, x0, y0, x1, y1) else {
                    continue;
                };
                if score >= config.conf_threshold {
                    boxes.push(BBox {
                        x1: x0 as f32,
                        y1: y0 as f32,
                        x2: x1 as f32,
                        y2: y1 as f32,
                        confidence: score,
                        class_id: dominant % config.num_classes,
                    });
                }
            }
        }

        non_max_suppression(&mut boxes, config.iou_threshold);
        debug!("🔍 {}: {} 个亮区", self.kind, boxes.len());
        Ok(InferenceOutput::Detections(boxes))
    }

    fn release(&mut self) {
        if self.config.take().is_some() {
            info!("♻️ {} 已释放", self.kind.label());
        }
    }

    fn is_ready(&self) -> bool {
        self.config.is_some()
    }
}
