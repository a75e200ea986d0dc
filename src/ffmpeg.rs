use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use image::RgbImage;
use log::debug;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::frame::{FrameSampling, FrameSet, FrameSource, VideoInfo};

/// 通过命令行调用 ffmpeg / ffprobe 抽帧
#[derive(Debug, Clone)]
pub struct FfmpegFrameSource {
    sampling: FrameSampling,
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegFrameSource {
    pub fn new(sampling: FrameSampling) -> Self {
        Self { sampling, ffmpeg: "ffmpeg".to_string(), ffprobe: "ffprobe".to_string() }
    }

    /// 使用指定路径的 ffmpeg 与 ffprobe
    pub fn with_programs(mut self, ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    pub fn sampling(&self) -> &FrameSampling {
        &self.sampling
    }

    fn run_ffprobe(&self, path: &Path) -> Result<String> {
        #[rustfmt::skip]
        let args = [
            OsStr::new("-v"),            OsStr::new("quiet"),
            OsStr::new("-show_format"),
            OsStr::new("-show_streams"),
            OsStr::new("-print_format"), OsStr::new("json"),
            path.as_os_str(),
        ];
        let output = run(&self.ffprobe, &args)?;
        if !output.status.success() {
            return Err(Error::Decode(format!("ffprobe 执行失败: {}", path.display())));
        }
        String::from_utf8(output.stdout)
            .map_err(|_| Error::Decode(format!("ffprobe 输出不是有效的 UTF-8: {}", path.display())))
    }
}

impl FrameSource for FfmpegFrameSource {
    fn check(&self) -> Result<()> {
        for program in [&self.ffmpeg, &self.ffprobe] {
            match run(program, &[OsStr::new("-version")]) {
                Ok(output) if output.status.success() => {}
                _ => return Err(Error::Configuration(format!("无法运行 {}", program))),
            }
        }
        Ok(())
    }

    fn extract_frames(&self, path: &Path) -> Result<FrameSet> {
        if !path.is_file() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        let info = self.get_info(path)?;
        let stride = self.sampling.stride_for(info.frame_count);
        let (width, height) = self.sampling.size;
        debug!("抽帧 {}: 间隔 {}，尺寸 {}x{}", path.display(), stride, width, height);

        let filter = format!("select='not(mod(n\\,{}))',scale={}:{}", stride, width, height);
        let max_frames = self.sampling.max_frames.max(1).to_string();

        #[rustfmt::skip]
        let args = [
            OsStr::new("-hide_banner"),
            OsStr::new("-loglevel"), OsStr::new("error"),
            OsStr::new("-nostats"),
            OsStr::new("-i"),        path.as_os_str(),
            OsStr::new("-vf"),       OsStr::new(&filter),
            OsStr::new("-vsync"),    OsStr::new("vfr"),
            OsStr::new("-frames:v"), OsStr::new(&max_frames),
            OsStr::new("-pix_fmt"),  OsStr::new("rgb24"),
            OsStr::new("-c:v"),      OsStr::new("rawvideo"),
            OsStr::new("-f"),        OsStr::new("image2pipe"),
            OsStr::new("-"),
        ];
        let output = run(&self.ffmpeg, &args)?;

        let frames = frames_from_raw(output.stdout, width, height);
        if frames.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Decode(format!("{}: {}", path.display(), stderr.trim())));
        }
        Ok(FrameSet::new(frames).with_info(info))
    }

    fn get_info(&self, path: &Path) -> Result<VideoInfo> {
        if !path.is_file() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        let mut info = parse_ffprobe(&self.run_ffprobe(path)?)?;
        if info.title.is_none() {
            info.title = path.file_stem().map(|s| s.to_string_lossy().into_owned());
        }
        Ok(info)
    }
}

fn run(program: &str, args: &[&OsStr]) -> Result<Output> {
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    Ok(command.output()?)
}

/// 将 rgb24 原始字节流切分为帧，末尾不完整的帧会被丢弃
fn frames_from_raw(raw: Vec<u8>, width: u32, height: u32) -> Vec<RgbImage> {
    let frame_size = width as usize * height as usize * 3;
    if frame_size == 0 {
        return vec![];
    }
    raw.chunks_exact(frame_size)
        .filter_map(|chunk| RgbImage::from_raw(width, height, chunk.to_vec()))
        .collect()
}

/// 解析 ffprobe 的 JSON 输出
fn parse_ffprobe(json: &str) -> Result<VideoInfo> {
    let value: Value = serde_json::from_str(json)?;
    let stream = value["streams"]
        .as_array()
        .and_then(|streams| streams.iter().find(|s| s["codec_type"] == "video"))
        .ok_or_else(|| Error::Decode("未找到视频流".to_string()))?;

    let duration = number(&value["format"]["duration"])
        .or_else(|| number(&stream["duration"]))
        .unwrap_or(0.);
    let fps = stream["avg_frame_rate"]
        .as_str()
        .and_then(parse_rate)
        .or_else(|| stream["r_frame_rate"].as_str().and_then(parse_rate))
        .unwrap_or(0.);
    let frame_count = number(&stream["nb_frames"]).map(|n| n as u64).or_else(|| {
        let estimate = duration * fps;
        (estimate > 0.).then_some(estimate.round() as u64)
    });
    let resolution = (
        stream["width"].as_u64().unwrap_or(0) as u32,
        stream["height"].as_u64().unwrap_or(0) as u32,
    );
    let title = value["format"]["tags"]["title"].as_str().map(str::to_string);

    Ok(VideoInfo { duration, fps, frame_count, resolution, title, uploader: None })
}

/// ffprobe 中的数字有时以字符串形式给出
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let (num, den) = (num.parse::<f64>().ok()?, den.parse::<f64>().ok()?);
    (den > 0. && num > 0.).then(|| num / den)
}
