// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频输入系统 (Video Input System)
///
/// 独立工作线程,负责帧采集与投递
/// - Frame:             不可变RGBA帧,Drop时执行释放钩子
/// - LatestFrameSource: 单槽邮箱 + 投递线程 (keep-latest 背压)
/// - SyntheticCamera:   合成摄像头 (测试/演示用)
pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{CameraConfig, SyntheticCamera};
pub use frame::{Frame, FrameMeta, ReleaseHook, Rotation};
pub use source::{FrameCallback, FrameSource, LatestFrameSource, SourceStats};
