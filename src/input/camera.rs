// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 合成摄像头 - 按固定帧率生成 RGBA 测试帧
//!
//! 画面: 暗色渐变背景 + 一个来回移动的亮色方块 + 少量随机噪声。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use rand::Rng;
use tracing::info;

use super::frame::{Frame, Rotation};
use super::source::LatestFrameSource;

/// 合成摄像头参数
#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub rotation: Rotation,
    pub noise: u8, // 噪声幅度
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30.0,
            rotation: Rotation::Deg0,
            noise: 8,
        }
    }
}

/// 合成摄像头 (独立采集线程)
pub struct SyntheticCamera {
    running: Arc<AtomicBool>,
    released: Arc<AtomicU64>,
    worker: Option<JoinHandle<u64>>,
}

impl SyntheticCamera {
    pub fn start(config: CameraConfig, source: Arc<LatestFrameSource>) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let released = Arc::new(AtomicU64::new(0));

        let thread_running = running.clone();
        let thread_released = released.clone();
        let worker = thread::Builder::new()
            .name("synthetic-camera".into())
            .spawn(move || capture_loop(config, source, thread_running, thread_released))?;

        Ok(Self {
            running,
            released,
            worker: Some(worker),
        })
    }

    /// 已被释放 (处理完毕或被丢弃) 的帧数
    pub fn released_frames(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// 停止采集,返回共生成的帧数
    pub fn stop(&mut self) -> u64 {
        self.running.store(false, Ordering::Release);
        match self.worker.take() {
            Some(handle) => handle.join().unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    config: CameraConfig,
    source: Arc<LatestFrameSource>,
    running: Arc<AtomicBool>,
    released: Arc<AtomicU64>,
) -> u64 {
    let interval = Duration::from_secs_f64(1.0 / config.fps.max(1.0));
    let mut rng = rand::thread_rng();
    let mut sequence = 0u64;
    let mut next_tick = Instant::now();

    info!(
        "🎥 合成摄像头启动: {}x{} @ {:.1}fps",
        config.width, config.height, config.fps
    );

    while running.load(Ordering::Acquire) && source.is_running() {
        let image = render_scene(&config, sequence, &mut rng);
        let counter = released.clone();
        let frame = Frame::new(sequence, config.width, config.height, image.into_raw())
            .with_rotation(config.rotation)
            .on_release(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        source.push(frame);
        sequence += 1;

        next_tick += interval;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        } else {
            // 落后太多时不追帧
            next_tick = now;
        }
    }

    info!("📹 合成摄像头退出,共生成 {} 帧", sequence);
    sequence
}

fn render_scene(config: &CameraConfig, sequence: u64, rng: &mut impl Rng) -> RgbaImage {
    let (w, h) = (config.width.max(1), config.height.max(1));
    let side = (w.min(h) / 4).max(1);
    let travel = w.saturating_sub(side).max(1) as u64;
    // 方块往返运动
    let phase = (sequence * 8) % (travel * 2);
    let left = (if phase < travel { phase } else { travel * 2 - phase }) as u32;
    let top = (h - side.min(h)) / 2;

    RgbaImage::from_fn(w, h, |x, y| {
        let inside = x >= left && x < left + side && y >= top && y < top + side;
        let base = if inside {
            [235u8, 220, 60]
        } else {
            let g = (y * 48 / h) as u8;
            [g, g, g + 16]
        };
        let noise = if config.noise > 0 {
            rng.gen_range(0..=config.noise)
        } else {
            0
        };
        Rgba([
            base[0].saturating_add(noise),
            base[1].saturating_add(noise),
            base[2].saturating_add(noise),
            255,
        ])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_has_bright_square() {
        let config = CameraConfig {
            width: 64,
            height: 32,
            noise: 0,
            ..Default::default()
        };
        let image = render_scene(&config, 0, &mut rand::thread_rng());
        // 方块边长 8, 位于左侧中部
        assert_eq!(image.get_pixel(2, 16).0, [235, 220, 60, 255]);
        assert!(image.get_pixel(40, 2).0[0] < 64);
    }

    #[test]
    fn camera_pushes_and_releases_frames() {
        let source = LatestFrameSource::new("cam-test").unwrap();
        let config = CameraConfig {
            width: 16,
            height: 16,
            fps: 200.0,
            ..Default::default()
        };
        let mut camera = SyntheticCamera::start(config, source.clone()).unwrap();
        thread::sleep(Duration::from_millis(100));
        let produced = camera.stop();
        source.shutdown();
        assert!(produced > 0);
        // 无回调挂载: 每帧要么被顶替要么无人认领,最终都被释放
        assert_eq!(camera.released_frames(), produced);
    }
}
