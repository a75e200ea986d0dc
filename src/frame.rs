use std::path::Path;

use image::RgbImage;
use serde::Serialize;

use crate::error::Result;

/// 帧采样参数
#[derive(Debug, Clone, Copy)]
pub struct FrameSampling {
    /// 每隔多少帧取一帧
    pub interval: u32,
    /// 最少帧数
    pub min_frames: u32,
    /// 最多帧数
    pub max_frames: u32,
    /// 帧缩放后的尺寸 (宽, 高)
    pub size: (u32, u32),
}

impl Default for FrameSampling {
    fn default() -> Self {
        Self { interval: 15, min_frames: 5, max_frames: 100, size: (224, 224) }
    }
}

impl FrameSampling {
    /// 根据视频总帧数计算实际采样间隔，保证短视频也能取到 `min_frames` 帧
    pub fn stride_for(&self, total_frames: Option<u64>) -> u32 {
        let interval = self.interval.max(1);
        match total_frames {
            Some(total) if total > 0 => {
                let needed = interval as u64 * self.min_frames.max(1) as u64;
                if total < needed {
                    (total / self.min_frames.max(1) as u64).max(1) as u32
                } else {
                    interval
                }
            }
            _ => interval,
        }
    }
}

/// 一个视频按固定间隔采样得到的帧，只能被消费一次
#[derive(Debug, Default)]
pub struct FrameSet {
    frames: Vec<RgbImage>,
    info: Option<VideoInfo>,
}

impl FrameSet {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self { frames, info: None }
    }

    /// 附带抽帧时已获取的视频信息，避免重复探测
    pub fn with_info(mut self, info: VideoInfo) -> Self {
        self.info = Some(info);
        self
    }

    pub fn info(&self) -> Option<&VideoInfo> {
        self.info.as_ref()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[RgbImage] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<RgbImage> {
        self.frames
    }
}

/// 视频基本信息
#[derive(Debug, Clone, Default, Serialize)]
pub struct VideoInfo {
    /// 时长，单位为秒
    pub duration: f64,
    pub fps: f64,
    pub frame_count: Option<u64>,
    pub resolution: (u32, u32),
    pub title: Option<String>,
    pub uploader: Option<String>,
}

/// 视频解码与抽帧
pub trait FrameSource: Send + Sync {
    /// 检查解码器是否可用，失败时整个批处理不会开始
    fn check(&self) -> Result<()> {
        Ok(())
    }

    /// 从本地视频文件中抽帧，文件不存在时返回 `NotFound`，解码失败时返回 `Decode`
    fn extract_frames(&self, path: &Path) -> Result<FrameSet>;

    /// 获取视频时长等信息，`extract_frames` 返回的帧已附带信息时不会再调用
    fn get_info(&self, path: &Path) -> Result<VideoInfo>;
}
