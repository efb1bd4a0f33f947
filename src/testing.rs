// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 测试辅助: 可编排的引擎、引擎工厂、带释放计数的帧

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::detection::{ClassScore, InferenceOutput};
use crate::error::EngineError;
use crate::input::Frame;
use crate::models::{EngineConfig, EngineFactory, EngineHandle, EngineKind};
use crate::pipeline::{RenderCallback, RenderUpdate, SharedState};

/// 引擎脚本
#[derive(Clone)]
pub struct Script {
    pub fail_init: bool,
    /// release() 计数后 panic
    pub panic_on_release: bool,
    /// 第 k, 2k, ... 次推理返回错误
    pub fail_every: Option<u64>,
    /// 第 k, 2k, ... 次推理 panic
    pub panic_every: Option<u64>,
    /// 推理开始时发送帧序号
    pub started: Option<Sender<u64>>,
    /// 推理阻塞直到收到信号 (或发送端被丢弃)
    pub gate: Option<Receiver<()>>,
    pub on_infer: Option<Arc<dyn Fn() + Send + Sync>>,
    pub output: InferenceOutput,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_init: false,
            panic_on_release: false,
            fail_every: None,
            panic_every: None,
            started: None,
            gate: None,
            on_infer: None,
            output: InferenceOutput::Classes(Vec::new()),
        }
    }
}

impl Script {
    /// 输出的类别编号即分数下标
    pub fn with_scores(scores: &[f32]) -> Self {
        let classes = scores
            .iter()
            .enumerate()
            .map(|(class_id, &probability)| ClassScore {
                class_id,
                probability,
            })
            .collect();
        Self {
            output: InferenceOutput::Classes(classes),
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct TraceInner {
    inits: AtomicUsize,
    infers: AtomicUsize,
    releases: AtomicUsize,
    in_flight_at_release: Mutex<Vec<usize>>,
    watched: Mutex<Option<Arc<SharedState>>>,
}

/// 引擎调用观测 (多个引擎可共享同一个观测记录)
#[derive(Clone, Default)]
pub struct EngineTrace {
    inner: Arc<TraceInner>,
}

impl EngineTrace {
    pub fn inits(&self) -> usize {
        self.inner.inits.load(Ordering::SeqCst)
    }

    pub fn infers(&self) -> usize {
        self.inner.infers.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.inner.releases.load(Ordering::SeqCst)
    }

    /// 每次 release() 被调用时的在途计数 (需先 watch)
    pub fn in_flight_at_release(&self) -> Vec<usize> {
        self.inner.in_flight_at_release.lock().clone()
    }

    pub fn watch(&self, state: Arc<SharedState>) {
        *self.inner.watched.lock() = Some(state);
    }
}

pub struct ScriptedEngine {
    kind: EngineKind,
    script: Script,
    trace: EngineTrace,
    ready: bool,
    calls: u64,
}

impl ScriptedEngine {
    pub fn new(kind: EngineKind, script: Script) -> (Self, EngineTrace) {
        let trace = EngineTrace::default();
        (Self::with_trace(kind, script, trace.clone()), trace)
    }

    pub fn with_trace(kind: EngineKind, script: Script, trace: EngineTrace) -> Self {
        Self {
            kind,
            script,
            trace,
            ready: false,
            calls: 0,
        }
    }
}

impl EngineHandle for ScriptedEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn init(&mut self, _config: &EngineConfig) -> Result<()> {
        self.trace.inner.inits.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_init {
            bail!("scripted init failure for {}", self.kind);
        }
        self.ready = true;
        Ok(())
    }

    fn infer(&mut self, frame: &Frame) -> Result<InferenceOutput> {
        if !self.ready {
            return Err(EngineError::NotInitialized(self.kind).into());
        }
        self.calls += 1;
        self.trace.inner.infers.fetch_add(1, Ordering::SeqCst);

        if let Some(tx) = &self.script.started {
            let _ = tx.send(frame.sequence());
        }
        if let Some(gate) = &self.script.gate {
            let _ = gate.recv();
        }
        if let Some(hook) = &self.script.on_infer {
            hook();
        }
        if matches!(self.script.panic_every, Some(k) if self.calls % k == 0) {
            panic!("scripted panic on call {}", self.calls);
        }
        if matches!(self.script.fail_every, Some(k) if self.calls % k == 0) {
            bail!("scripted failure on call {}", self.calls);
        }
        Ok(self.script.output.clone())
    }

    fn release(&mut self) {
        self.trace.inner.releases.fetch_add(1, Ordering::SeqCst);
        if let Some(state) = self.trace.inner.watched.lock().as_ref() {
            self.trace
                .inner
                .in_flight_at_release
                .lock()
                .push(state.in_flight());
        }
        self.ready = false;
        if self.script.panic_on_release {
            panic!("scripted panic in release for {}", self.kind);
        }
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

/// 按引擎类型分配脚本的工厂;所有引擎共享一个观测记录
#[derive(Default)]
pub struct ScriptedFactory {
    scripts: Mutex<HashMap<EngineKind, Script>>,
    created: Mutex<Vec<EngineKind>>,
    trace: EngineTrace,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, kind: EngineKind, script: Script) -> Self {
        self.scripts.lock().insert(kind, script);
        self
    }

    pub fn trace(&self) -> EngineTrace {
        self.trace.clone()
    }

    pub fn created(&self) -> Vec<EngineKind> {
        self.created.lock().clone()
    }
}

impl EngineFactory for ScriptedFactory {
    fn create(&self, kind: EngineKind) -> Box<dyn EngineHandle> {
        self.created.lock().push(kind);
        let script = self.scripts.lock().get(&kind).cloned().unwrap_or_default();
        Box::new(ScriptedEngine::with_trace(kind, script, self.trace.clone()))
    }
}

/// 4x4 的帧,释放时计数 +1
pub fn counted_frame(sequence: u64, released: &Arc<AtomicUsize>) -> Frame {
    let released = released.clone();
    Frame::new(sequence, 4, 4, vec![128; 4 * 4 * 4]).on_release(move |_| {
        released.fetch_add(1, Ordering::SeqCst);
    })
}

/// 收集渲染回调内容
#[derive(Clone, Default)]
pub struct RecordingSink {
    updates: Arc<Mutex<Vec<RenderUpdate>>>,
}

impl RecordingSink {
    pub fn callback(&self) -> RenderCallback {
        let updates = self.updates.clone();
        Arc::new(move |update: &RenderUpdate| updates.lock().push(update.clone()))
    }

    pub fn updates(&self) -> Vec<RenderUpdate> {
        self.updates.lock().clone()
    }
}
