// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测结果系统 (Detection Results)
///
/// - types:     检测框/分类得分/推理输出/检测事件
/// - event_log: 有界事件日志 (快照 + 监听者广播)
/// - labels:    类别名称解析
pub mod event_log;
pub mod labels;
pub mod types;

pub use event_log::{EventLog, Listener, ListenerId, DEFAULT_CAPACITY};
pub use labels::{LabelResolver, LabelTable};
pub use types::{non_max_suppression, BBox, ClassScore, DetectionEvent, Embedding, InferenceOutput};
