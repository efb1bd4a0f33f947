// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测系统数据结构定义
//! Data structures for the detection system

use std::cmp::Ordering;

use chrono::{Local, TimeZone};
use ndarray::{Array, IxDyn};

// ========== 推理输出 ==========

/// 检测框 (Detection bounding box)
#[derive(Clone, Debug, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

impl BBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, another: &BBox) -> f32 {
        let l = self.x1.max(another.x1);
        let r = self.x2.min(another.x2);
        let t = self.y1.max(another.y1);
        let b = self.y2.min(another.y2);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn iou(&self, another: &BBox) -> f32 {
        let inter = self.intersection_area(another);
        let union = self.area() + another.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// 分类得分
#[derive(Clone, Debug, PartialEq)]
pub struct ClassScore {
    pub class_id: usize,
    pub probability: f32,
}

/// 单帧推理结果: 检测框集合或分类Top-K
#[derive(Clone, Debug, PartialEq)]
pub enum InferenceOutput {
    Detections(Vec<BBox>),
    Classes(Vec<ClassScore>),
}

impl InferenceOutput {
    pub fn len(&self) -> usize {
        match self {
            InferenceOutput::Detections(boxes) => boxes.len(),
            InferenceOutput::Classes(classes) => classes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按得分降序取前K个 (class_id, score)
    pub fn top_k(&self, k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = match self {
            InferenceOutput::Detections(boxes) => {
                boxes.iter().map(|b| (b.class_id, b.confidence)).collect()
            }
            InferenceOutput::Classes(classes) => {
                classes.iter().map(|c| (c.class_id, c.probability)).collect()
            }
        };
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

/// 按置信度降序的非极大值抑制
pub fn non_max_suppression(boxes: &mut Vec<BBox>, iou_threshold: f32) {
    boxes.sort_by(|b1, b2| {
        b2.confidence
            .partial_cmp(&b1.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut current_index = 0;
    for index in 0..boxes.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if boxes[prev_index].iou(&boxes[index]) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            boxes.swap(current_index, index);
            current_index += 1;
        }
    }
    boxes.truncate(current_index);
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Embedding {
    // An float32 n-dims tensor
    data: Array<f32, IxDyn>,
}

impl Embedding {
    pub fn new(data: Array<f32, IxDyn>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Array<f32, IxDyn> {
        &self.data
    }

    pub fn topk(&self, k: usize) -> Vec<(usize, f32)> {
        let mut probs = self
            .data
            .iter()
            .enumerate()
            .map(|(a, b)| (a, *b))
            .collect::<Vec<_>>();
        probs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        probs.truncate(k);
        probs
    }
}

// ========== 结果事件 ==========

/// 检测事件 (写入事件日志,创建后不可变)
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionEvent {
    pub timestamp_ms: i64,
    pub label: String,
    pub score: f32,
}

impl DetectionEvent {
    pub fn new(timestamp_ms: i64, label: impl Into<String>, score: f32) -> Self {
        Self {
            timestamp_ms,
            label: label.into(),
            score,
        }
    }

    /// HH:MM:SS.mmm (本地时间)
    pub fn time_string(&self) -> String {
        match Local.timestamp_millis_opt(self.timestamp_ms).single() {
            Some(t) => t.format("%H:%M:%S%.3f").to_string(),
            None => "--:--:--.---".to_string(),
        }
    }

    pub fn score_string(&self) -> String {
        format!("{:.1}%", self.score * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> BBox {
        BBox {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id: 0,
        }
    }

    #[test]
    fn nms_keeps_highest_of_overlapping() {
        let mut boxes = vec![
            bbox(0., 0., 10., 10., 0.5),
            bbox(1., 1., 10., 10., 0.9),
            bbox(50., 50., 60., 60., 0.7),
        ];
        non_max_suppression(&mut boxes, 0.45);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].confidence, 0.9);
        assert_eq!(boxes[1].confidence, 0.7);
    }

    #[test]
    fn top_k_orders_by_score() {
        let output = InferenceOutput::Detections(vec![
            bbox(0., 0., 1., 1., 0.2),
            bbox(0., 0., 1., 1., 0.8),
            bbox(0., 0., 1., 1., 0.5),
        ]);
        let top = output.top_k(2);
        assert_eq!(top.iter().map(|t| t.1).collect::<Vec<_>>(), vec![0.8, 0.5]);
    }

    #[test]
    fn embedding_topk() {
        let e = Embedding::new(Array::from_vec(vec![0.1, 0.7, 0.2]).into_dyn());
        assert_eq!(e.topk(2), vec![(1, 0.7), (2, 0.2)]);
    }

    #[test]
    fn event_formats_score() {
        let e = DetectionEvent::new(0, "person", 0.875);
        assert_eq!(e.score_string(), "87.5%");
        assert_eq!(e.time_string().len(), "00:00:00.000".len());
    }
}
