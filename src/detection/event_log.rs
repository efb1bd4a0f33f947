// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测事件日志 (Event Log)
//!
//! 固定容量的环形缓冲区,满时淘汰最旧的事件。每次追加后把完整快照
//! (最新在前) 广播给所有监听者;监听者应按整份快照幂等渲染。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::types::DetectionEvent;

/// 默认容量
pub const DEFAULT_CAPACITY: usize = 500;

/// 快照监听者
pub type Listener = Arc<dyn Fn(&[DetectionEvent]) + Send + Sync>;

/// 监听者句柄 (用于注销)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct EventLog {
    capacity: usize,
    events: Mutex<VecDeque<DetectionEvent>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// 追加一批事件;空批次不触发通知
    pub fn append(&self, events: Vec<DetectionEvent>) {
        if events.is_empty() {
            return;
        }
        {
            let mut buffer = self.events.lock();
            for event in events {
                if buffer.len() == self.capacity {
                    buffer.pop_front();
                }
                buffer.push_back(event);
            }
        }
        self.notify();
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.notify();
    }

    /// 时间点快照,最新的事件在前
    pub fn snapshot(&self) -> Vec<DetectionEvent> {
        self.events.lock().iter().rev().cloned().collect()
    }

    /// 注册监听者并立即推送当前快照
    pub fn add_listener(
        &self,
        listener: impl Fn(&[DetectionEvent]) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let listener: Listener = Arc::new(listener);
        self.listeners.lock().push((id, listener.clone()));
        listener(&self.snapshot());
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn notify(&self) {
        // 复制监听者列表后在锁外回调,监听者可以重入日志
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        if listeners.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for listener in listeners {
            listener(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn event(i: usize) -> DetectionEvent {
        DetectionEvent::new(i as i64, format!("e{}", i), 0.5)
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let log = EventLog::new(500);
        for i in 0..600 {
            log.append(vec![event(i)]);
        }
        let snap = log.snapshot();
        assert_eq!(snap.len(), 500);
        assert_eq!(snap.first().unwrap().label, "e599");
        assert_eq!(snap.last().unwrap().label, "e100");
    }

    #[test]
    fn batch_append_evicts_in_order() {
        let log = EventLog::new(3);
        log.append((0..5).map(event).collect());
        let labels: Vec<_> = log.snapshot().into_iter().map(|e| e.label).collect();
        assert_eq!(labels, vec!["e4", "e3", "e2"]);
    }

    #[test]
    fn listener_gets_snapshot_on_register_and_append() {
        let log = EventLog::new(10);
        log.append(vec![event(1)]);

        let seen = Arc::new(Mutex::new(Vec::<usize>::new()));
        let sink = seen.clone();
        let id = log.add_listener(move |snap| sink.lock().push(snap.len()));
        log.append(vec![event(2), event(3)]);
        log.append(vec![]);
        log.clear();

        assert_eq!(*seen.lock(), vec![1, 3, 0]);

        assert!(log.remove_listener(id));
        log.append(vec![event(4)]);
        assert_eq!(seen.lock().len(), 3);
        assert!(!log.remove_listener(id));
    }

    #[test]
    fn listener_may_reenter_log() {
        let log = Arc::new(EventLog::new(10));
        let inner = log.clone();
        let lens = Arc::new(Mutex::new(Vec::new()));
        let sink = lens.clone();
        log.add_listener(move |_| sink.lock().push(inner.len()));
        log.append(vec![event(0)]);
        assert_eq!(*lens.lock(), vec![0, 1]);
    }

    #[test]
    fn concurrent_producers_respect_bound() {
        let log = Arc::new(EventLog::new(100));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = log.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        log.append(vec![event(t * 1000 + i)]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.len(), 100);
        assert_eq!(log.capacity(), 100);
    }
}
