// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 帧分发器 (Frame Dispatcher)
//! 职责: 帧源回调 → 代数检查 → 抽帧 → 推理 → 发布结果 (渲染回调 + 事件日志)
//!
//! 分发器绝不向帧源抛出错误或 panic: 引擎错误与 panic 都在这里被捕获,
//! 只记录日志并发送状态事件。

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::state::SharedState;
use super::{panic_message, PipelineEvent, RenderUpdate, StatusBus};
use crate::detection::{DetectionEvent, EventLog, LabelResolver};
use crate::input::{Frame, FrameCallback};

/// 渲染回调 (界面更新)
pub type RenderCallback = Arc<dyn Fn(&RenderUpdate) + Send + Sync>;

/// 单帧处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 分析器所属代数已过期
    Stale,
    /// 被抽帧跳过
    Skipped,
    Published,
    /// 推理完成时代数已变化,结果被丢弃
    Discarded,
    /// 引擎报错或 panic
    Failed,
}

/// 分发统计 (跨代累计)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub stale: u64,
    pub skipped: u64,
    pub dispatched: u64,
    pub published: u64,
    pub discarded: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    stale: AtomicU64,
    skipped: AtomicU64,
    dispatched: AtomicU64,
    published: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
}

/// 分发器模板: 每次切换后用新代数构建一个 FrameDispatcher
#[derive(Clone)]
pub struct DispatchContext {
    state: Arc<SharedState>,
    log: Arc<EventLog>,
    render: Option<RenderCallback>,
    labels: Arc<dyn LabelResolver>,
    status: StatusBus,
    decimation: u64,
    top_k: usize,
    counters: Arc<Counters>,
}

impl DispatchContext {
    pub fn new(
        state: Arc<SharedState>,
        log: Arc<EventLog>,
        labels: Arc<dyn LabelResolver>,
        status: StatusBus,
    ) -> Self {
        Self {
            state,
            log,
            render: None,
            labels,
            status,
            decimation: 1,
            top_k: 5,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_render(mut self, render: RenderCallback) -> Self {
        self.render = Some(render);
        self
    }

    /// 每 N 帧处理一帧 (N=1 不跳帧)
    pub fn with_decimation(mut self, every: u32) -> Self {
        self.decimation = every.max(1) as u64;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn status(&self) -> &StatusBus {
        &self.status
    }

    /// 构建固定在指定代数上的分发器
    pub fn build(&self, generation: u64) -> Arc<FrameDispatcher> {
        Arc::new(FrameDispatcher {
            ctx: self.clone(),
            generation,
            frame_counter: AtomicU64::new(0),
        })
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            delivered: c.delivered.load(Ordering::Relaxed),
            stale: c.stale.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            published: c.published.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct FrameDispatcher {
    ctx: DispatchContext,
    generation: u64,
    frame_counter: AtomicU64,
}

impl FrameDispatcher {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 转换为帧源回调
    pub fn into_callback(self: Arc<Self>) -> FrameCallback {
        Arc::new(move |frame: Frame| {
            self.on_frame(frame);
        })
    }

    /// 处理一帧;帧在返回前一定被释放
    pub fn on_frame(&self, frame: Frame) -> DispatchOutcome {
        let counters = &self.ctx.counters;
        counters.delivered.fetch_add(1, Ordering::Relaxed);

        // 1. 过期的分析器 (上一次切换前挂载的) 直接丢帧
        if !self.ctx.state.accepts(self.generation) {
            counters.stale.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::Stale;
        }

        // 2. 抽帧
        let n = self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.ctx.decimation != 0 {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::Skipped;
        }

        // 3. 在途计数 (守卫在任何路径上恰好归还一次)
        let _in_flight = self.ctx.state.enter();
        counters.dispatched.fetch_add(1, Ordering::Relaxed);

        // 4-6. 推理 + 发布,错误与 panic 不外泄
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.process(&frame))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let failed = counters.failed.fetch_add(1, Ordering::Relaxed) + 1;
                let message = panic_message(payload.as_ref());
                if failed <= 3 || failed % 30 == 0 {
                    warn!(
                        "💥 推理 panic (gen {} 帧 #{}): {}",
                        self.generation,
                        frame.sequence(),
                        message
                    );
                }
                self.ctx.status.publish(PipelineEvent::FramePanicked {
                    generation: self.generation,
                    sequence: frame.sequence(),
                    message,
                });
                DispatchOutcome::Failed
            }
        };

        // 7. 释放帧
        drop(frame);
        outcome
    }

    fn process(&self, frame: &Frame) -> DispatchOutcome {
        let counters = &self.ctx.counters;
        let start = Instant::now();

        let (engine, output) = match self.ctx.state.infer(frame) {
            Ok(result) => result,
            Err(e) => {
                let failed = counters.failed.fetch_add(1, Ordering::Relaxed) + 1;
                if failed <= 3 || failed % 30 == 0 {
                    warn!(
                        "⚠️ 推理失败 (gen {} 帧 #{}): {:#}",
                        self.generation,
                        frame.sequence(),
                        e
                    );
                }
                self.ctx.status.publish(PipelineEvent::FrameFailed {
                    generation: self.generation,
                    sequence: frame.sequence(),
                    error: format!("{:#}", e),
                });
                return DispatchOutcome::Failed;
            }
        };
        let inference_ms = start.elapsed().as_secs_f64() * 1000.0;

        // 5. 推理期间发生了切换: 结果作废,不更新界面也不写日志
        //    许可持有到写完日志,期间不会铸造新代数
        let Some(_permit) = self.ctx.state.publish_permit(self.generation) else {
            counters.discarded.fetch_add(1, Ordering::Relaxed);
            debug!("🗑️ 丢弃过期结果 (gen {} 帧 #{})", self.generation, frame.sequence());
            self.ctx.status.publish(PipelineEvent::StaleResultDiscarded {
                generation: self.generation,
                sequence: frame.sequence(),
            });
            return DispatchOutcome::Discarded;
        };

        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let events: Vec<DetectionEvent> = output
            .top_k(self.ctx.top_k)
            .into_iter()
            .map(|(class_id, score)| {
                DetectionEvent::new(timestamp_ms, self.ctx.labels.label(class_id), score)
            })
            .collect();

        if let Some(render) = &self.ctx.render {
            render(&RenderUpdate {
                generation: self.generation,
                engine,
                meta: frame.meta(),
                events: events.clone(),
                output,
                inference_ms,
            });
        }
        self.ctx.log.append(events);

        counters.published.fetch_add(1, Ordering::Relaxed);
        DispatchOutcome::Published
    }
}
