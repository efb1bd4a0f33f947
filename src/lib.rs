#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 流水线配置参数
pub mod detection; // 检测结果、事件日志与标签
pub mod error; // 错误类型
pub mod input; // 帧与帧源
pub mod models; // 引擎接口与合成后端
pub mod pipeline; // 帧分发 + 引擎热切换
pub mod utils; // FPS统计等工具

#[cfg(test)]
mod testing;

pub use crate::config::PipelineConfig;
pub use crate::detection::{DetectionEvent, EventLog, InferenceOutput, LabelResolver, LabelTable};
pub use crate::error::{EngineError, SwitchError};
pub use crate::input::{Frame, FrameSource, LatestFrameSource};
pub use crate::models::{BuiltinEngines, EngineConfig, EngineFactory, EngineHandle, EngineKind};
pub use crate::pipeline::{
    DispatchContext, FrameDispatcher, PipelineEvent, RenderUpdate, SharedState, StatusBus,
    SwitchCoordinator, SwitchOutcome,
};
