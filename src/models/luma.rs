// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 亮度直方图分类器 (合成后端)
//!
//! 亮度直方图分为 num_classes 个桶,归一化后作为类别概率,输出 Top-K。

use anyhow::Result;
use ndarray::Array;
use tracing::info;

use super::{EngineConfig, EngineHandle, EngineKind};
use crate::detection::{ClassScore, Embedding, InferenceOutput};
use crate::error::EngineError;
use crate::input::Frame;

/// 直方图采样上限 (像素)
const MAX_SAMPLES: u32 = 4096;

#[derive(Default)]
pub struct LumaClassifier {
    config: Option<EngineConfig>,
}

impl LumaClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn histogram(frame: &Frame, buckets: usize) -> Vec<f32> {
        let (w, h) = (frame.width(), frame.height());
        let total = w as u64 * h as u64;
        let step = ((total / MAX_SAMPLES as u64).max(1) as f64).sqrt().ceil() as usize;

        let mut hist = vec![0f32; buckets];
        for y in (0..h).step_by(step) {
            for x in (0..w).step_by(step) {
                if let Some(p) = frame.pixel(x, y) {
                    let luma = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
                    let bucket = ((luma / 256.0) * buckets as f32) as usize;
                    hist[bucket.min(buckets - 1)] += 1.0;
                }
            }
        }

        let sum: f32 = hist.iter().sum();
        if sum > 0.0 {
            hist.iter_mut().for_each(|v| *v /= sum);
        }
        hist
    }
}

impl EngineHandle for LumaClassifier {
    fn kind(&self) -> EngineKind {
        EngineKind::Classifier
    }

    fn init(&mut self, config: &EngineConfig) -> Result<()> {
        config.check_model_files()?;
        self.config = Some(config.clone());
        info!(
            "✅ {} 加载成功 ({}类, top{})",
            EngineKind::Classifier.label(),
            config.num_classes,
            config.top_k
        );
        Ok(())
    }

    fn infer(&mut self, frame: &Frame) -> Result<InferenceOutput> {
        let config = self
            .config
            .as_ref()
            .ok_or(EngineError::NotInitialized(EngineKind::Classifier))?;
        frame.validate()?;

        let probs = Embedding::new(
            Array::from_vec(Self::histogram(frame, config.num_classes)).into_dyn(),
        );
        let classes = probs
            .topk(config.top_k)
            .into_iter()
            .map(|(class_id, probability)| ClassScore {
                class_id,
                probability,
            })
            .collect();
        Ok(InferenceOutput::Classes(classes))
    }

    fn release(&mut self) {
        if self.config.take().is_some() {
            info!("♻️ {} 已释放", EngineKind::Classifier.label());
        }
    }

    fn is_ready(&self) -> bool {
        self.config.is_some()
    }
}
