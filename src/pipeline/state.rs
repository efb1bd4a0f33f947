// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 分发器与切换协调器共享的状态
//!
//! - generation: 当前代数 (只由切换协调器递增;持有发布许可期间不会变化)
//! - in_flight:  正在执行的推理数
//! - switching:  是否正在切换 (CAS 保证同一时刻最多一次切换)
//! - engine:     当前激活的引擎槽位 (推理期间持锁,释放必须等推理返回)
//! - status:     引擎状态 (单独加锁,界面查询不被推理阻塞)

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use super::panic_message;
use crate::detection::InferenceOutput;
use crate::error::EngineError;
use crate::input::Frame;
use crate::models::{EngineHandle, EngineKind};

/// 引擎状态 (供界面显示)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    /// 尚未绑定任何引擎
    Empty,
    Ready(EngineKind),
    /// 初始化失败,引擎已绑定但不可用
    Failed { kind: EngineKind, reason: String },
}

impl EngineStatus {
    pub fn kind(&self) -> Option<EngineKind> {
        match self {
            EngineStatus::Empty => None,
            EngineStatus::Ready(kind) | EngineStatus::Failed { kind, .. } => Some(*kind),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, EngineStatus::Ready(_))
    }
}

/// 被移除的引擎
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedEngine {
    pub kind: EngineKind,
    /// release() 中 panic 的信息
    pub panic: Option<String>,
}

pub struct SharedState {
    generation: AtomicU64,
    publish_gate: RwLock<()>,
    in_flight: AtomicUsize,
    switching: AtomicBool,
    engine: Mutex<Option<Box<dyn EngineHandle>>>,
    status: Mutex<EngineStatus>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            publish_gate: RwLock::new(()),
            in_flight: AtomicUsize::new(0),
            switching: AtomicBool::new(false),
            engine: Mutex::new(None),
            status: Mutex::new(EngineStatus::Empty),
        }
    }

    // ========== 代数 ==========

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// 该代数是否仍可发布结果: 必须是当前代数,且没有切换在进行
    pub fn accepts(&self, generation: u64) -> bool {
        !self.switching.load(Ordering::SeqCst) && self.current_generation() == generation
    }

    /// 发布许可: 该代数仍被接受时返回读守卫,持有期间不会铸造新代数
    pub(crate) fn publish_permit(&self, generation: u64) -> Option<RwLockReadGuard<'_, ()>> {
        let permit = self.publish_gate.read();
        self.accepts(generation).then_some(permit)
    }

    /// 等待所有进行中的发布结束后再递增
    pub(crate) fn mint_generation(&self) -> u64 {
        let _gate = self.publish_gate.write();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ========== 在途计数 ==========

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 在途计数 +1,返回的守卫在任何退出路径上恰好 -1
    pub fn enter(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { state: self }
    }

    /// 轮询等待在途计数归零;超时返回 false
    pub fn wait_idle(&self, timeout: Duration, poll: Duration) -> bool {
        let start = Instant::now();
        while self.in_flight() > 0 {
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(poll);
        }
        true
    }

    // ========== 切换标志 ==========

    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::SeqCst)
    }

    pub(crate) fn try_begin_switch(&self) -> bool {
        self.switching
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_switch(&self) {
        self.switching.store(false, Ordering::SeqCst);
    }

    // ========== 引擎槽位 ==========

    /// 不受推理阻塞
    pub fn engine_status(&self) -> EngineStatus {
        self.status.lock().clone()
    }

    /// 在当前引擎上推理,返回 (引擎类型, 输出)
    pub(crate) fn infer(&self, frame: &Frame) -> Result<(EngineKind, InferenceOutput)> {
        let mut slot = self.engine.lock();
        let engine = slot.as_mut().ok_or(EngineError::Unavailable)?;
        if !engine.is_ready() {
            return Err(EngineError::NotInitialized(engine.kind()).into());
        }
        let kind = engine.kind();
        let output = engine.infer(frame)?;
        Ok((kind, output))
    }

    /// 释放并移除当前引擎;release() 的 panic 被捕获,槽位照常清空
    pub(crate) fn release_engine(&self) -> Option<ReleasedEngine> {
        let mut slot = self.engine.lock();
        *self.status.lock() = EngineStatus::Empty;
        let mut old = slot.take()?;
        let kind = old.kind();
        let panic = panic::catch_unwind(AssertUnwindSafe(|| old.release()))
            .err()
            .map(|payload| panic_message(payload.as_ref()));
        Some(ReleasedEngine { kind, panic })
    }

    /// 绑定新引擎 (不论是否初始化成功);创建时 panic 的引擎以 None 绑定
    pub(crate) fn install_engine(
        &self,
        handle: Option<Box<dyn EngineHandle>>,
        status: EngineStatus,
    ) {
        let mut slot = self.engine.lock();
        *slot = handle;
        *self.status.lock() = status;
    }
}

/// 在途计数守卫
pub struct InFlightGuard<'a> {
    state: &'a SharedState,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
