use std::f32::consts::PI;

use image::{GrayImage, RgbImage};
use image::imageops::grayscale;
use imageproc::edges::canny;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use imageproc::local_binary_patterns::local_binary_pattern;
use log::warn;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::frame::FrameSet;

pub const HUE_BINS: usize = 50;
pub const SATURATION_BINS: usize = 60;
pub const VALUE_BINS: usize = 60;
pub const COLOR_DIM: usize = HUE_BINS + SATURATION_BINS + VALUE_BINS;
pub const TEXTURE_BINS: usize = 36;
pub const EDGE_BINS: usize = 36;
/// 单帧特征维数
pub const FRAME_DIM: usize = COLOR_DIM + TEXTURE_BINS + EDGE_BINS;
/// 视频原始特征维数（均值 + 标准差）
pub const RAW_DIM: usize = FRAME_DIM * 2;

const CANNY_LOW: f32 = 50.;
const CANNY_HIGH: f32 = 150.;
/// LBP 邻域点数 (半径为 1)
const LBP_POINTS: u32 = 8;

/// 将一组视频帧转换为定长特征向量
///
/// 每帧提取颜色、纹理、边缘三种直方图，再对所有帧逐维计算均值与标准差，
/// 因此输出长度与帧数无关，固定为 [`RAW_DIM`]。
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureBuilder;

impl FeatureBuilder {
    pub fn new() -> Self {
        Self
    }

    /// 计算视频的原始特征向量，各帧并行计算，单帧失败时用零向量代替
    pub fn build(&self, frames: &FrameSet) -> Result<Vec<f32>> {
        if frames.is_empty() {
            return Err(Error::EmptyFrameSet);
        }

        let per_frame = frames
            .frames()
            .par_iter()
            .enumerate()
            .map(|(i, frame)| match frame_features(frame) {
                Ok(features) => features,
                Err(e) => {
                    warn!("第 {} 帧特征提取失败，使用零向量代替: {}", i, e);
                    vec![0.; FRAME_DIM]
                }
            })
            .collect::<Vec<_>>();

        Ok(aggregate(&per_frame))
    }
}

/// 提取单帧特征：颜色直方图 + LBP 纹理直方图 + 边缘方向直方图
pub fn frame_features(frame: &RgbImage) -> Result<Vec<f32>> {
    let (width, height) = frame.dimensions();
    if width < 3 || height < 3 {
        return Err(Error::InvalidFrame(format!("帧尺寸过小: {}x{}", width, height)));
    }

    let gray = grayscale(frame);
    let mut features = Vec::with_capacity(FRAME_DIM);
    features.extend(color_histogram(frame));
    features.extend(texture_histogram(&gray));
    features.extend(edge_histogram(&gray));

    if features.iter().any(|x| !x.is_finite()) {
        return Err(Error::InvalidFrame("特征中包含非有限值".to_string()));
    }
    Ok(features)
}

/// HSV 三通道直方图，各自 L2 归一化后拼接
pub fn color_histogram(frame: &RgbImage) -> Vec<f32> {
    let mut hue = vec![0f32; HUE_BINS];
    let mut saturation = vec![0f32; SATURATION_BINS];
    let mut value = vec![0f32; VALUE_BINS];

    for pixel in frame.pixels() {
        let (h, s, v) = rgb_to_hsv(pixel.0);
        hue[bin_index(h, 360., HUE_BINS)] += 1.;
        saturation[bin_index(s, 1., SATURATION_BINS)] += 1.;
        value[bin_index(v, 1., VALUE_BINS)] += 1.;
    }

    l2_normalize(&mut hue);
    l2_normalize(&mut saturation);
    l2_normalize(&mut value);

    let mut ret = hue;
    ret.extend(saturation);
    ret.extend(value);
    ret
}

/// 旋转不变的均匀 LBP（P=8, R=1）直方图
///
/// 均匀模式映射为其中 1 的个数 (0..=8)，非均匀模式统一映射为 9，
/// 输出范围 [0, 10) 均分为 [`TEXTURE_BINS`] 个区间。
pub fn texture_histogram(gray: &GrayImage) -> Vec<f32> {
    let mut hist = vec![0f32; TEXTURE_BINS];
    let (width, height) = gray.dimensions();
    let range = (LBP_POINTS + 2) as f32;

    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            if let Some(pattern) = local_binary_pattern(gray, x, y) {
                let code = rotation_invariant_uniform(pattern);
                hist[bin_index(code as f32, range, TEXTURE_BINS)] += 1.;
            }
        }
    }

    l2_normalize(&mut hist);
    hist
}

/// Canny 边缘上的梯度方向直方图，以梯度幅值加权
pub fn edge_histogram(gray: &GrayImage) -> Vec<f32> {
    let mut hist = vec![0f32; EDGE_BINS];
    let edges = canny(gray, CANNY_LOW, CANNY_HIGH);
    let gx = horizontal_sobel(gray);
    let gy = vertical_sobel(gray);

    for (x, y, pixel) in edges.enumerate_pixels() {
        if pixel.0[0] == 0 {
            continue;
        }
        let dx = gx.get_pixel(x, y).0[0] as f32;
        let dy = gy.get_pixel(x, y).0[0] as f32;
        let magnitude = (dx * dx + dy * dy).sqrt();
        let direction = dy.atan2(dx) + PI;
        hist[bin_index(direction, 2. * PI, EDGE_BINS)] += magnitude;
    }

    l2_normalize(&mut hist);
    hist
}

/// 将各帧特征逐维求均值与总体标准差并拼接
///
/// 使用 Welford 算法，帧完全相同时标准差严格为 0
fn aggregate(per_frame: &[Vec<f32>]) -> Vec<f32> {
    let dim = per_frame.first().map(Vec::len).unwrap_or(0);
    let mut mean = vec![0f64; dim];
    let mut m2 = vec![0f64; dim];

    for (n, features) in per_frame.iter().enumerate() {
        let k = (n + 1) as f64;
        for i in 0..dim {
            let x = features[i] as f64;
            let delta = x - mean[i];
            mean[i] += delta / k;
            m2[i] += delta * (x - mean[i]);
        }
    }

    let n = per_frame.len().max(1) as f64;
    let mut ret = Vec::with_capacity(dim * 2);
    ret.extend(mean.iter().map(|&x| x as f32));
    ret.extend(m2.iter().map(|&x| (x / n).max(0.).sqrt() as f32));
    ret
}

fn rotation_invariant_uniform(pattern: u8) -> u32 {
    let transitions = (pattern ^ pattern.rotate_right(1)).count_ones();
    if transitions <= 2 { pattern.count_ones() } else { LBP_POINTS + 1 }
}

/// 返回 `[0, range)` 区间均分为 `bins` 份后 `x` 所在的下标，越界值落入首尾区间
fn bin_index(x: f32, range: f32, bins: usize) -> usize {
    let idx = (x / range * bins as f32).floor();
    if idx <= 0. { 0 } else { (idx as usize).min(bins - 1) }
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0. {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// 返回 (色相 [0, 360), 饱和度 [0, 1], 明度 [0, 1])
fn rgb_to_hsv([r, g, b]: [u8; 3]) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32 / 255., g as f32 / 255., b as f32 / 255.);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0. {
        0.
    } else if max == r {
        60. * ((g - b) / delta).rem_euclid(6.)
    } else if max == g {
        60. * ((b - r) / delta + 2.)
    } else {
        60. * ((r - g) / delta + 4.)
    };
    let saturation = if max == 0. { 0. } else { delta / max };

    (hue, saturation, max)
}
