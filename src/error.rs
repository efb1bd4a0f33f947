// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 流水线错误类型 (Pipeline error types)

use thiserror::Error;

use crate::models::EngineKind;

/// 推理引擎错误
#[derive(Error, Debug)]
pub enum EngineError {
    /// 引擎尚未初始化或已释放
    #[error("engine {0} is not initialized")]
    NotInitialized(EngineKind),

    /// 当前没有绑定任何引擎 (切换中或初始化失败)
    #[error("no engine bound")]
    Unavailable,

    /// 帧数据不合法 (尺寸/步长/缓冲区长度)
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// 模型加载失败
    #[error("engine {kind} failed to initialize: {reason}")]
    InitFailed { kind: EngineKind, reason: String },
}

/// 引擎切换错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwitchError {
    /// 协调器已关闭,切换结果不会再送达
    #[error("switch coordinator has shut down")]
    Shutdown,

    /// 等待切换完成超时
    #[error("timed out waiting for switch to complete")]
    Timeout,
}
