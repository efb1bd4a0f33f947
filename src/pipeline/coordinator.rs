// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 引擎切换协调器 (Switch Coordinator)
//!
//! 切换流程: Idle → Switching → Idle
//! 1. 暂停 (控制线程): 从帧源卸下分析回调
//! 2. 排空 (工作线程): 轮询在途计数直到归零或超时;超时不中止切换
//! 3. 换引擎 (工作线程): 释放旧引擎 → 工厂创建新引擎 → init (失败或 panic 也继续)
//! 4. 恢复 (控制线程): 铸造新代数 → 构建新分发器 → 重新挂载 → 清除切换标志
//!
//! 工作线程在任何路径上都会发出恢复消息或清除切换标志。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{error, info, warn};

use super::dispatcher::{DispatchContext, DispatchStats};
use super::state::{EngineStatus, ReleasedEngine, SharedState};
use super::{panic_message, PipelineEvent, StatusBus};
use crate::error::{EngineError, SwitchError};
use crate::input::FrameSource;
use crate::models::{EngineConfig, EngineFactory, EngineHandle, EngineKind};

/// 排空参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchSettings {
    pub drain_timeout: Duration,
    pub drain_poll: Duration,
}

impl Default for SwitchSettings {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_millis(1000),
            drain_poll: Duration::from_millis(10),
        }
    }
}

/// 排空结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// 在途计数是否在超时前归零
    pub drained: bool,
    pub waited: Duration,
    /// 放弃等待时仍在途的推理数
    pub residual: usize,
}

/// 一次切换的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub generation: u64,
    pub kind: EngineKind,
    pub engine_ready: bool,
    pub drain: DrainReport,
    pub elapsed: Duration,
}

/// 切换凭据: 等待切换完成
pub struct SwitchTicket {
    rx: Receiver<SwitchOutcome>,
}

impl SwitchTicket {
    pub fn wait(&self) -> Result<SwitchOutcome, SwitchError> {
        self.rx.recv().map_err(|_| SwitchError::Shutdown)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<SwitchOutcome, SwitchError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => SwitchError::Timeout,
            RecvTimeoutError::Disconnected => SwitchError::Shutdown,
        })
    }
}

// ========== 线程间消息 ==========

enum ControlMessage {
    Switch {
        config: EngineConfig,
        reply: Sender<SwitchOutcome>,
        started: Instant,
    },
    Resume {
        kind: EngineKind,
        engine_ready: bool,
        drain: DrainReport,
        reply: Sender<SwitchOutcome>,
        started: Instant,
    },
    Shutdown,
}

struct SwapRequest {
    config: EngineConfig,
    reply: Sender<SwitchOutcome>,
    started: Instant,
}

pub struct SwitchCoordinator {
    state: Arc<SharedState>,
    status: StatusBus,
    dispatch: DispatchContext,
    source: Arc<dyn FrameSource>,
    control_tx: Sender<ControlMessage>,
    control: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl SwitchCoordinator {
    /// 启动控制线程与工作线程;此时没有引擎,首个引擎通过 request_switch 绑定
    pub fn start(
        source: Arc<dyn FrameSource>,
        factory: Arc<dyn EngineFactory>,
        dispatch: DispatchContext,
        settings: SwitchSettings,
    ) -> std::io::Result<Self> {
        let state = dispatch.state().clone();
        let status = dispatch.status().clone();
        let (control_tx, control_rx) = unbounded::<ControlMessage>();
        let (swap_tx, swap_rx) = unbounded::<SwapRequest>();

        let worker = {
            let control_tx = control_tx.clone();
            let state = state.clone();
            let status = status.clone();
            thread::Builder::new()
                .name("switch-worker".into())
                .spawn(move || worker_loop(swap_rx, control_tx, factory, state, status, settings))?
        };

        let control = {
            let source = source.clone();
            let dispatch = dispatch.clone();
            thread::Builder::new()
                .name("switch-control".into())
                .spawn(move || control_loop(control_rx, swap_tx, source, dispatch))?
        };

        info!(
            "🚀 切换协调器已启动 (排空超时 {:?}, 轮询 {:?})",
            settings.drain_timeout, settings.drain_poll
        );

        Ok(Self {
            state,
            status,
            dispatch,
            source,
            control_tx,
            control: Some(control),
            worker: Some(worker),
        })
    }

    /// 请求切换引擎;已有切换进行中时忽略 (不排队) 并返回 None
    pub fn request_switch(&self, config: EngineConfig) -> Option<SwitchTicket> {
        if self.control.is_none() {
            warn!("⚠️ 切换协调器已关闭,忽略请求: {}", config.kind);
            self.status.publish(PipelineEvent::SwitchIgnored {
                requested: config.kind,
            });
            return None;
        }
        if !self.state.try_begin_switch() {
            info!("⏳ 切换进行中,忽略请求: {}", config.kind);
            self.status.publish(PipelineEvent::SwitchIgnored {
                requested: config.kind,
            });
            return None;
        }

        let kind = config.kind;
        let from = self.state.engine_status().kind();
        info!(
            "🔄 切换引擎: {} → {}",
            from.map(|k| k.to_string()).unwrap_or_else(|| "none".into()),
            kind
        );
        self.status.publish(PipelineEvent::SwitchStarted {
            from,
            to: kind,
            generation: self.state.current_generation(),
        });

        let (reply, rx) = bounded(1);
        let message = ControlMessage::Switch {
            config,
            reply,
            started: Instant::now(),
        };
        if self.control_tx.send(message).is_err() {
            warn!("⚠️ 控制线程已退出,切换取消: {}", kind);
            self.state.end_switch();
            return None;
        }
        Some(SwitchTicket { rx })
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn engine_status(&self) -> EngineStatus {
        self.state.engine_status()
    }

    pub fn is_switching(&self) -> bool {
        self.state.is_switching()
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatch.stats()
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        self.status.subscribe()
    }

    /// 停止线程、卸下回调并释放当前引擎;可重复调用
    pub fn shutdown(&mut self) {
        let Some(control) = self.control.take() else {
            return;
        };
        let _ = self.control_tx.send(ControlMessage::Shutdown);
        if control.join().is_err() {
            error!("❌ 控制线程异常退出");
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("❌ 工作线程异常退出");
            }
        }

        self.source.detach();
        if let Some(released) = self.state.release_engine() {
            report_release(&self.status, released);
        }
        self.state.end_switch();
        info!("🛑 切换协调器已关闭");
    }
}

impl Drop for SwitchCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ========== 控制线程: 帧源生命周期 ==========

fn control_loop(
    rx: Receiver<ControlMessage>,
    swap_tx: Sender<SwapRequest>,
    source: Arc<dyn FrameSource>,
    dispatch: DispatchContext,
) {
    let state = dispatch.state().clone();
    let status = dispatch.status().clone();

    while let Ok(message) = rx.recv() {
        match message {
            ControlMessage::Switch {
                config,
                reply,
                started,
            } => {
                // 1. 暂停
                source.detach();
                info!("⏸️ 分析已暂停 (gen {})", state.current_generation());
                let request = SwapRequest {
                    config,
                    reply,
                    started,
                };
                if swap_tx.send(request).is_err() {
                    error!("❌ 工作线程已退出,无法切换");
                    state.end_switch();
                    break;
                }
            }
            ControlMessage::Resume {
                kind,
                engine_ready,
                drain,
                reply,
                started,
            } => {
                // 4. 恢复
                let generation = state.mint_generation();
                let dispatcher = dispatch.build(generation);
                source.rebind(dispatcher.into_callback());
                state.end_switch();

                let outcome = SwitchOutcome {
                    generation,
                    kind,
                    engine_ready,
                    drain,
                    elapsed: started.elapsed(),
                };
                info!(
                    "▶️ 分析已恢复: {} (gen {}, {}, 耗时 {:.1}ms)",
                    kind,
                    generation,
                    if engine_ready { "就绪" } else { "不可用" },
                    outcome.elapsed.as_secs_f64() * 1000.0
                );
                status.publish(PipelineEvent::SwitchCompleted {
                    generation,
                    kind,
                    engine_ready,
                });
                let _ = reply.send(outcome);
            }
            ControlMessage::Shutdown => break,
        }
    }
}

// ========== 工作线程: 排空 + 换引擎 ==========

fn worker_loop(
    rx: Receiver<SwapRequest>,
    control_tx: Sender<ControlMessage>,
    factory: Arc<dyn EngineFactory>,
    state: Arc<SharedState>,
    status: StatusBus,
    settings: SwitchSettings,
) {
    while let Ok(request) = rx.recv() {
        let guard = SwitchGuard::new(&state);
        let kind = request.config.kind;

        // 2. 排空
        let drain = drain(&state, &status, settings);

        // 3. 换引擎
        let swap = panic::catch_unwind(AssertUnwindSafe(|| {
            swap_engine(factory.as_ref(), &state, &status, &request.config)
        }));
        let engine_ready = swap.unwrap_or_else(|payload| {
            error!("❌ 换引擎 panic: {}", panic_message(payload.as_ref()));
            false
        });

        let resume = ControlMessage::Resume {
            kind,
            engine_ready,
            drain,
            reply: request.reply,
            started: request.started,
        };
        if control_tx.send(resume).is_err() {
            break;
        }
        guard.disarm();
    }
}

/// 切换标志守卫: 恢复消息没有交给控制线程时清除切换标志
struct SwitchGuard<'a> {
    state: &'a SharedState,
    armed: bool,
}

impl<'a> SwitchGuard<'a> {
    fn new(state: &'a SharedState) -> Self {
        Self { state, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.end_switch();
        }
    }
}

/// 旧引擎释放完成后才创建新引擎;返回新引擎是否就绪
fn swap_engine(
    factory: &dyn EngineFactory,
    state: &SharedState,
    status: &StatusBus,
    config: &EngineConfig,
) -> bool {
    if let Some(released) = state.release_engine() {
        report_release(status, released);
    }
    let (handle, engine_status) = create_engine(factory, config);
    let engine_ready = engine_status.is_ready();
    match &engine_status {
        EngineStatus::Ready(kind) => status.publish(PipelineEvent::EngineReady { kind: *kind }),
        EngineStatus::Failed { kind, reason } => {
            status.publish(PipelineEvent::EngineInitFailed {
                kind: *kind,
                reason: reason.clone(),
            })
        }
        EngineStatus::Empty => {}
    }
    state.install_engine(handle, engine_status);
    engine_ready
}

fn report_release(status: &StatusBus, released: ReleasedEngine) {
    match released.panic {
        None => info!("♻️ 已释放引擎: {}", released.kind),
        Some(message) => {
            error!("❌ 释放引擎 {} 时 panic: {}", released.kind, message);
            status.publish(PipelineEvent::EngineReleaseFailed {
                kind: released.kind,
                message,
            });
        }
    }
}

fn drain(state: &SharedState, status: &StatusBus, settings: SwitchSettings) -> DrainReport {
    let start = Instant::now();
    let drained = state.wait_idle(settings.drain_timeout, settings.drain_poll);
    let waited = start.elapsed();
    let residual = state.in_flight();

    if !drained {
        warn!(
            "⚠️ 排空超时 ({:?}),仍有 {} 个推理在途,继续切换",
            waited, residual
        );
        status.publish(PipelineEvent::DrainTimedOut {
            in_flight: residual,
            waited,
        });
    }
    DrainReport {
        drained,
        waited,
        residual: if drained { 0 } else { residual },
    }
}

/// 创建并初始化引擎;init 失败或 panic 都不中止切换
fn create_engine(
    factory: &dyn EngineFactory,
    config: &EngineConfig,
) -> (Option<Box<dyn EngineHandle>>, EngineStatus) {
    let kind = config.kind;
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut engine = factory.create(kind);
        let init = engine.init(config);
        (engine, init)
    }));

    match result {
        Ok((engine, Ok(()))) => (Some(engine), EngineStatus::Ready(kind)),
        Ok((engine, Err(e))) => {
            let reason = format!("{:#}", e);
            error!("❌ {}", EngineError::InitFailed { kind, reason: reason.clone() });
            (Some(engine), EngineStatus::Failed { kind, reason })
        }
        Err(_) => {
            error!("❌ {} 初始化 panic", kind.label());
            let reason = "engine init panicked".to_string();
            (None, EngineStatus::Failed { kind, reason })
        }
    }
}
