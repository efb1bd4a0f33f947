// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 工具模块
/// Utility modules
use std::time::{Duration, Instant};

/// 每秒刷新一次的速率统计 (HUD 显示用)
#[derive(Debug, Clone)]
pub struct FpsCounter {
    count: u64,
    last: Instant,
    current: f64,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            count: 0,
            last: Instant::now(),
            current: 0.0,
        }
    }

    /// 记录一次事件,返回当前速率
    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> f64 {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.last);
        if elapsed >= Duration::from_secs(1) {
            self.current = self.count as f64 / elapsed.as_secs_f64();
            self.count = 0;
            self.last = now;
        }
        self.current
    }

    pub fn fps(&self) -> f64 {
        self.current
    }
}

/// 本地时间字符串,各字段以 delimiter 分隔
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    chrono::Local::now().format(&fmt).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_updates_once_per_second() {
        let start = Instant::now();
        let mut counter = FpsCounter {
            count: 0,
            last: start,
            current: 0.0,
        };
        for i in 1..30 {
            assert_eq!(counter.tick_at(start + Duration::from_millis(i * 10)), 0.0);
        }
        let fps = counter.tick_at(start + Duration::from_secs(1));
        assert!((fps - 30.0).abs() < 1e-9);
        assert_eq!(counter.fps(), fps);
    }

    #[test]
    fn time_string_uses_delimiter() {
        let s = gen_time_string("-");
        assert_eq!(s.split('-').count(), 7);
    }
}
