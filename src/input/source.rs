// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 帧源 (Frame Source)
//!
//! 保留最新帧的背压策略 (keep-latest): 邮箱只容纳一个待投递帧,新帧到达时
//! 旧的未投递帧被直接丢弃 (Drop 即释放)。投递线程逐帧调用当前挂载的回调,
//! 同一时刻最多只有一次回调在执行。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use super::frame::Frame;

/// 帧回调 (分析器)
pub type FrameCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// 帧源接口: 由流生命周期上下文 (控制线程) 调用
pub trait FrameSource: Send + Sync {
    /// 挂载分析回调
    fn attach(&self, callback: FrameCallback);

    /// 卸下分析回调;之后到达的帧直接释放
    fn detach(&self);

    /// 原子替换分析回调,返回之前是否已有回调挂载
    fn rebind(&self, callback: FrameCallback) -> bool;
}

/// 帧源统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub pushed: u64,
    pub delivered: u64,
    pub dropped: u64,   // 被更新的帧顶替
    pub unclaimed: u64, // 无回调挂载时到达
}

struct Mailbox {
    pending: Option<Frame>,
    closed: bool,
}

struct Shared {
    mailbox: Mutex<Mailbox>,
    ready: Condvar,
    callback: Mutex<Option<FrameCallback>>,
    running: AtomicBool,
    pushed: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    unclaimed: AtomicU64,
}

/// 单槽邮箱 + 投递线程
pub struct LatestFrameSource {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LatestFrameSource {
    pub fn new(name: &str) -> std::io::Result<Arc<Self>> {
        let shared = Arc::new(Shared {
            mailbox: Mutex::new(Mailbox {
                pending: None,
                closed: false,
            }),
            ready: Condvar::new(),
            callback: Mutex::new(None),
            running: AtomicBool::new(true),
            pushed: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            unclaimed: AtomicU64::new(0),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name(format!("{}-delivery", name))
            .spawn(move || delivery_loop(worker_shared))?;

        info!("📹 帧源 {} 已启动 (keep-latest)", name);
        Ok(Arc::new(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// 推入新帧;若有未投递的旧帧则将其丢弃
    pub fn push(&self, frame: Frame) {
        self.shared.pushed.fetch_add(1, Ordering::Relaxed);
        let stale = {
            let mut mailbox = self.shared.mailbox.lock();
            if mailbox.closed {
                Some(frame)
            } else {
                let old = mailbox.pending.replace(frame);
                if old.is_some() {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                }
                old
            }
        };
        self.shared.ready.notify_one();
        // 在锁外释放旧帧,释放钩子可能较慢
        drop(stale);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            pushed: self.shared.pushed.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            unclaimed: self.shared.unclaimed.load(Ordering::Relaxed),
        }
    }

    /// 停止投递线程;邮箱中剩余的帧被释放
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let leftover = {
            let mut mailbox = self.shared.mailbox.lock();
            mailbox.closed = true;
            mailbox.pending.take()
        };
        self.shared.ready.notify_all();
        drop(leftover);

        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        info!("🛑 帧源已停止");
    }
}

impl FrameSource for LatestFrameSource {
    fn attach(&self, callback: FrameCallback) {
        *self.shared.callback.lock() = Some(callback);
        debug!("🔗 分析回调已挂载");
    }

    fn detach(&self) {
        self.shared.callback.lock().take();
        debug!("✂️ 分析回调已卸下");
    }

    fn rebind(&self, callback: FrameCallback) -> bool {
        let previous = self.shared.callback.lock().replace(callback);
        previous.is_some()
    }
}

impl Drop for LatestFrameSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn delivery_loop(shared: Arc<Shared>) {
    loop {
        let frame = {
            let mut mailbox = shared.mailbox.lock();
            loop {
                if let Some(frame) = mailbox.pending.take() {
                    break frame;
                }
                if mailbox.closed {
                    return;
                }
                shared.ready.wait(&mut mailbox);
            }
        };

        // 回调在锁外执行,detach/rebind 不会被正在进行的推理阻塞
        let callback = shared.callback.lock().clone();
        match callback {
            Some(callback) => {
                shared.delivered.fetch_add(1, Ordering::Relaxed);
                callback(frame);
            }
            None => {
                shared.unclaimed.fetch_add(1, Ordering::Relaxed);
                drop(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counted_frame(seq: u64, released: &Arc<AtomicUsize>) -> Frame {
        let released = released.clone();
        Frame::new(seq, 1, 1, vec![0; 4]).on_release(move |_| {
            released.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn delivers_to_attached_callback() {
        let source = LatestFrameSource::new("test").unwrap();
        let (tx, rx) = unbounded();
        source.attach(Arc::new(move |frame: Frame| {
            let _ = tx.send(frame.sequence());
        }));
        source.push(Frame::new(1, 1, 1, vec![0; 4]));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 1);
        source.shutdown();
        assert_eq!(source.stats().delivered, 1);
    }

    #[test]
    fn keeps_only_latest_pending_frame() {
        let source = LatestFrameSource::new("latest").unwrap();
        let released = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = bounded(1);
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let (seen_tx, seen_rx) = unbounded();

        source.attach(Arc::new(move |frame: Frame| {
            if frame.sequence() == 0 {
                let _ = started_tx.send(());
                let _ = gate_rx.recv();
            }
            let _ = seen_tx.send(frame.sequence());
        }));

        // 第0帧占住投递线程,后续帧在邮箱中互相顶替
        source.push(counted_frame(0, &released));
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        for seq in 1..=5 {
            source.push(counted_frame(seq, &released));
        }
        gate_tx.send(()).unwrap();

        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 0);
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 5);
        source.shutdown();

        assert_eq!(source.stats().dropped, 4);
        assert_eq!(released.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn detached_source_releases_frames() {
        let source = LatestFrameSource::new("detached").unwrap();
        let released = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = unbounded();
        source.attach(Arc::new(move |frame: Frame| {
            let _ = tx.send(frame.sequence());
        }));
        source.detach();
        source.push(counted_frame(1, &released));
        source.shutdown();
        assert!(rx.try_recv().is_err());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rebind_reports_previous_callback() {
        let source = LatestFrameSource::new("rebind").unwrap();
        let noop: FrameCallback = Arc::new(|_frame: Frame| {});
        assert!(!source.rebind(noop.clone()));
        assert!(source.rebind(noop));
        source.detach();
        assert!(!source.rebind(Arc::new(|_frame: Frame| {})));
    }

    #[test]
    fn push_after_shutdown_releases_immediately() {
        let source = LatestFrameSource::new("closed").unwrap();
        source.shutdown();
        assert!(!source.is_running());
        let released = Arc::new(AtomicUsize::new(0));
        source.push(counted_frame(9, &released));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
