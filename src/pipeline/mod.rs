// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 帧分发与引擎切换流水线 (Dispatch & Switch Pipeline)
///
/// 三个执行上下文,通过通道通信:
/// - 投递线程: 帧源回调 → FrameDispatcher (推理 + 发布结果)
/// - 控制线程: 帧源生命周期 (暂停/恢复分析回调、铸造新代数)
/// - 工作线程: 等待在途推理归零 + 释放旧引擎/初始化新引擎
pub mod coordinator;
pub mod dispatcher;
pub mod state;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::detection::{DetectionEvent, InferenceOutput};
use crate::input::FrameMeta;
use crate::models::EngineKind;

pub use coordinator::{
    DrainReport, SwitchCoordinator, SwitchOutcome, SwitchSettings, SwitchTicket,
};
pub use dispatcher::{
    DispatchContext, DispatchOutcome, DispatchStats, FrameDispatcher, RenderCallback,
};
pub use state::{EngineStatus, InFlightGuard, ReleasedEngine, SharedState};

// ========== 消息类型定义 ==========

/// 渲染数据 (分发器 → 渲染回调)
#[derive(Clone, Debug)]
pub struct RenderUpdate {
    pub generation: u64,
    pub engine: EngineKind,
    pub meta: FrameMeta,
    pub events: Vec<DetectionEvent>, // Top-K 事件 (与写入日志的相同)
    pub output: InferenceOutput,
    pub inference_ms: f64,
}

/// 流水线状态事件 (诊断用)
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    FrameFailed {
        generation: u64,
        sequence: u64,
        error: String,
    },
    FramePanicked {
        generation: u64,
        sequence: u64,
        message: String,
    },
    StaleResultDiscarded {
        generation: u64,
        sequence: u64,
    },
    SwitchStarted {
        from: Option<EngineKind>,
        to: EngineKind,
        generation: u64,
    },
    SwitchIgnored {
        requested: EngineKind,
    },
    DrainTimedOut {
        in_flight: usize,
        waited: Duration,
    },
    EngineReleaseFailed {
        kind: EngineKind,
        message: String,
    },
    EngineReady {
        kind: EngineKind,
    },
    EngineInitFailed {
        kind: EngineKind,
        reason: String,
    },
    SwitchCompleted {
        generation: u64,
        kind: EngineKind,
        engine_ready: bool,
    },
}

/// 状态事件广播: 满的订阅者丢消息,断开的订阅者被移除,发布方永不阻塞
#[derive(Clone)]
pub struct StatusBus {
    subscribers: Arc<Mutex<Vec<Sender<PipelineEvent>>>>,
    capacity: usize,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl StatusBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (tx, rx) = bounded(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: PipelineEvent) {
        self.subscribers
            .lock()
            .retain(|tx| !matches!(tx.try_send(event.clone()), Err(TrySendError::Disconnected(_))));
    }
}

/// panic 载荷转成可读文本
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
