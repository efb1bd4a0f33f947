// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 实时检测 + 引擎热切换演示
///
/// 系统架构:
/// 1. 采集线程: 合成摄像头 → 帧源 (只保留最新帧)
/// 2. 投递线程: 帧源 → 分发器 → 推理 → 渲染回调 + 事件日志
/// 3. 控制/工作线程: 引擎切换 (暂停 → 排空 → 换引擎 → 恢复)
/// 4. 主线程:   定时切换引擎、打印 HUD
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use livedet::detection::{EventLog, LabelResolver, LabelTable};
use livedet::input::{CameraConfig, LatestFrameSource, SyntheticCamera};
use livedet::models::{BuiltinEngines, EngineConfig, EngineKind};
use livedet::pipeline::{
    DispatchContext, PipelineEvent, RenderUpdate, SharedState, StatusBus, SwitchCoordinator,
};
use livedet::utils::{gen_time_string, FpsCounter};
use livedet::PipelineConfig;

/// 实时检测参数
#[derive(Parser, Debug)]
#[command(author, version, about = "实时检测 + 引擎热切换演示", long_about = None)]
struct Args {
    /// 运行时长 (秒)
    #[arg(short, long, default_value_t = 20)]
    duration: u64,

    /// 每隔多少秒切换一次引擎 (0 = 不切换)
    #[arg(short, long, default_value_t = 5)]
    switch_every: u64,

    /// 初始引擎: detector / segmenter / classifier
    #[arg(short, long, default_value = "detector")]
    engine: String,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// 每N帧处理一帧 (覆盖配置文件)
    #[arg(long)]
    decimation: Option<u32>,

    /// 配置文件
    #[arg(short, long, default_value = "livedet.json")]
    config: PathBuf,

    /// 标签目录 (coco.names 或 metadata.yaml)
    #[arg(long)]
    labels: Option<PathBuf>,

    /// 模型目录 (.param / .bin)
    #[arg(long)]
    models: Option<PathBuf>,
}

/// HUD 数据 (渲染回调写,主线程读)
#[derive(Default)]
struct Hud {
    fps: FpsCounter,
    detections: usize,
    inference_ms: f64,
    engine: Option<EngineKind>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = PipelineConfig::load(&args.config);
    if let Some(n) = args.decimation {
        config.decimation = n;
        config = config.sanitized();
    }
    config.print_summary();

    let initial = EngineKind::parse(&args.engine)
        .ok_or_else(|| anyhow!("未知引擎: {}", args.engine))?;
    let engine_config = |kind: EngineKind| -> EngineConfig {
        let engine = config.engine(kind).clone();
        match &args.models {
            Some(dir) => engine.with_model_dir(dir),
            None => engine,
        }
    };

    info!("🚀 livedet 启动 (session {})", gen_time_string("-"));
    info!("📹 合成摄像头: {}x{} @ {:.0}fps", args.width, args.height, args.fps);

    // ========== 结果输出 ==========
    let labels: Arc<dyn LabelResolver> = Arc::new(match &args.labels {
        Some(dir) => LabelTable::load_dir(dir),
        None => LabelTable::default(),
    });
    let log = Arc::new(EventLog::new(config.event_log_capacity));
    let hud = Arc::new(Mutex::new(Hud::default()));
    let render = {
        let hud = hud.clone();
        Arc::new(move |update: &RenderUpdate| {
            let mut hud = hud.lock();
            hud.fps.tick();
            hud.detections = update.output.len();
            hud.inference_ms = update.inference_ms;
            hud.engine = Some(update.engine);
        })
    };

    // ========== 流水线 ==========
    let state = Arc::new(SharedState::new());
    let bus = StatusBus::new(config.status_capacity);
    let status = bus.subscribe();
    let dispatch = DispatchContext::new(state, log.clone(), labels, bus)
        .with_render(render)
        .with_decimation(config.decimation)
        .with_top_k(config.top_k);

    let source = LatestFrameSource::new("camera")?;
    let mut coordinator = SwitchCoordinator::start(
        source.clone(),
        Arc::new(BuiltinEngines),
        dispatch,
        config.switch_settings(),
    )?;

    let boot = coordinator
        .request_switch(engine_config(initial))
        .ok_or_else(|| anyhow!("无法启动初始引擎"))?
        .wait()?;
    if !boot.engine_ready {
        warn!("⚠️ 初始引擎 {} 不可用,帧将被丢弃直到下一次切换", initial);
    }

    let mut camera = SyntheticCamera::start(
        CameraConfig {
            width: args.width,
            height: args.height,
            fps: args.fps,
            ..CameraConfig::default()
        },
        source.clone(),
    )?;

    // ========== 主循环 ==========
    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.duration);
    let switch_every = Duration::from_secs(args.switch_every);
    let mut next_switch = started + switch_every;
    let mut next_hud = started + Duration::from_secs(1);
    let mut kind = initial;

    while Instant::now() < deadline {
        let wait = next_hud.min(deadline).saturating_duration_since(Instant::now());
        match status.recv_timeout(wait) {
            Ok(PipelineEvent::SwitchCompleted {
                generation,
                kind: done,
                engine_ready,
            }) => info!("✅ 切换完成: {} (gen {}, ready={})", done, generation, engine_ready),
            Ok(event) => debug!("📣 {:?}", event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        if now >= next_hud {
            next_hud = now + Duration::from_secs(1);
            let hud = hud.lock();
            info!(
                "🎯 {:.1} fps | {} det | {:.1}ms/帧 | {}",
                hud.fps.fps(),
                hud.detections,
                hud.inference_ms,
                hud.engine.map(|k| k.to_string()).unwrap_or_else(|| "-".into())
            );
        }

        if !switch_every.is_zero() && now >= next_switch {
            next_switch = now + switch_every;
            let target = kind.next();
            // 不等待结果,完成事件从状态通道到达
            if coordinator.request_switch(engine_config(target)).is_some() {
                kind = target;
            }
        }
    }

    // ========== 关闭 ==========
    let generated = camera.stop();
    coordinator.shutdown();
    source.shutdown();

    let stats = coordinator.stats();
    let source_stats = source.stats();
    println!("\n📊 运行统计:");
    println!(
        "  采集 {} 帧 | 投递 {} | 被顶替 {} | 无人接收 {}",
        generated, source_stats.delivered, source_stats.dropped, source_stats.unclaimed
    );
    println!(
        "  推理 {} | 发布 {} | 丢弃(过期) {} | 失败 {} | 抽帧跳过 {}",
        stats.dispatched, stats.published, stats.discarded, stats.failed, stats.skipped
    );
    println!("  已释放帧: {}", camera.released_frames());

    println!("\n📝 最新事件 ({} / {}):", log.len(), log.capacity());
    for event in log.snapshot().iter().take(10) {
        println!(
            "  {}  {:<16} {}",
            event.time_string(),
            event.label,
            event.score_string()
        );
    }
    Ok(())
}
