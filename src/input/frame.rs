// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 视频帧 (Frame)
//!
//! 帧一旦采集便不可变;所有权从帧源移交给分发器,处理结束后无论成功、失败还是
//! 跳过,都会在 `Drop` 中执行释放钩子,且只执行一次。

use std::fmt;

use image::{ImageBuffer, Rgba};

use crate::error::EngineError;

/// 每像素字节数 (RGBA8888)
pub const BYTES_PER_PIXEL: u32 = 4;

/// 帧旋转角度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// 从角度构造,非 90 的整数倍时按最近的象限取整
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            45..=134 => Rotation::Deg90,
            135..=224 => Rotation::Deg180,
            225..=314 => Rotation::Deg270,
            _ => Rotation::Deg0,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

/// 帧元数据 (随结果一起送往渲染回调)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub row_stride: u32,
    pub rotation: Rotation,
    pub timestamp_ms: i64, // 到达时间 (Unix毫秒)
}

/// 释放钩子: 帧被释放时调用一次
pub type ReleaseHook = Box<dyn FnOnce(&FrameMeta) + Send>;

/// RGBA 像素帧
pub struct Frame {
    data: Vec<u8>,
    meta: FrameMeta,
    on_release: Option<ReleaseHook>,
}

impl Frame {
    /// 以紧密排列的 RGBA 缓冲区构造帧 (row_stride = width * 4)
    pub fn new(sequence: u64, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self::with_stride(sequence, width, height, width.saturating_mul(BYTES_PER_PIXEL), data)
    }

    pub fn with_stride(
        sequence: u64,
        width: u32,
        height: u32,
        row_stride: u32,
        data: Vec<u8>,
    ) -> Self {
        Self {
            data,
            meta: FrameMeta {
                sequence,
                width,
                height,
                row_stride,
                rotation: Rotation::Deg0,
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
            },
            on_release: None,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.meta.rotation = rotation;
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.meta.timestamp_ms = timestamp_ms;
        self
    }

    /// 注册释放钩子 (帧源用于回收缓冲区/统计)
    pub fn on_release(mut self, hook: impl FnOnce(&FrameMeta) + Send + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    pub fn meta(&self) -> FrameMeta {
        self.meta
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn row_stride(&self) -> u32 {
        self.meta.row_stride
    }

    pub fn rotation(&self) -> Rotation {
        self.meta.rotation
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.meta.timestamp_ms
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 检查尺寸、步长与缓冲区长度是否一致
    pub fn validate(&self) -> Result<(), EngineError> {
        let FrameMeta {
            width,
            height,
            row_stride,
            ..
        } = self.meta;
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidFrame(format!("empty frame {}x{}", width, height)));
        }
        let row_bytes = width as u64 * BYTES_PER_PIXEL as u64;
        if (row_stride as u64) < row_bytes {
            return Err(EngineError::InvalidFrame(format!(
                "row stride {} < {} bytes",
                row_stride, row_bytes
            )));
        }
        let needed = row_stride as u64 * (height as u64 - 1) + row_bytes;
        if (self.data.len() as u64) < needed {
            return Err(EngineError::InvalidFrame(format!(
                "buffer holds {} bytes, need {}",
                self.data.len(),
                needed
            )));
        }
        Ok(())
    }

    /// 读取像素 (考虑行步长)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.meta.width || y >= self.meta.height {
            return None;
        }
        let offset =
            y as usize * self.meta.row_stride as usize + x as usize * BYTES_PER_PIXEL as usize;
        self.data
            .get(offset..offset + 4)
            .map(|p| [p[0], p[1], p[2], p[3]])
    }

    /// 紧密排列时零拷贝视为 RgbaImage
    pub fn as_rgba_image(&self) -> Option<ImageBuffer<Rgba<u8>, &[u8]>> {
        if self.meta.width.checked_mul(BYTES_PER_PIXEL) != Some(self.meta.row_stride) {
            return None;
        }
        let len = (self.meta.row_stride as usize).checked_mul(self.meta.height as usize)?;
        ImageBuffer::from_raw(self.meta.width, self.meta.height, self.data.get(..len)?)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            hook(&self.meta);
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("bytes", &self.data.len())
            .finish()
    }
}
