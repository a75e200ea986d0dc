use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{Rgb, RgbImage};
use rstest::*;
use vidsearch::error::{Error, ErrorKind, Result};
use vidsearch::frame::{FrameSet, FrameSource, VideoInfo};
use vidsearch::location::{LocationResolver, Materialized};
use vidsearch::normalize::Projection;
use vidsearch::store::{IndexKind, StoreSettings};
use vidsearch::{BatchReport, CancelToken, Pipeline, PipelineBuilder, WorkItem};

const RED: [u8; 3] = [255, 0, 0];
const GREEN: [u8; 3] = [0, 255, 0];
const BLUE: [u8; 3] = [0, 0, 255];
const YELLOW: [u8; 3] = [255, 255, 0];
const MAGENTA: [u8; 3] = [255, 0, 255];

/// 按路径返回预先生成的纯色帧
#[derive(Default)]
struct MemoryFrames {
    videos: HashMap<PathBuf, (RgbImage, usize)>,
    cancel_on_extract: Option<CancelToken>,
    broken: bool,
    attach_info: bool,
    info_calls: AtomicUsize,
}

impl MemoryFrames {
    fn video(mut self, name: &str, color: [u8; 3], frames: usize) -> Self {
        self.videos.insert(PathBuf::from(name), (RgbImage::from_pixel(16, 16, Rgb(color)), frames));
        self
    }
}

impl FrameSource for MemoryFrames {
    fn check(&self) -> Result<()> {
        if self.broken {
            return Err(Error::NotFound("ffmpeg".to_string()));
        }
        Ok(())
    }

    fn extract_frames(&self, path: &Path) -> Result<FrameSet> {
        if let Some(cancel) = &self.cancel_on_extract {
            cancel.cancel();
        }
        let (frame, count) = self.videos.get(path).ok_or_else(|| Error::NotFound(path.display().to_string()))?;
        let frames = FrameSet::new(vec![frame.clone(); *count]);
        if self.attach_info {
            let info = VideoInfo { title: Some("attached".to_string()), ..info_for(*count) };
            return Ok(frames.with_info(info));
        }
        Ok(frames)
    }

    fn get_info(&self, path: &Path) -> Result<VideoInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        let (_, count) = self.videos.get(path).ok_or_else(|| Error::NotFound(path.display().to_string()))?;
        Ok(info_for(*count))
    }
}

/// 共享同一个 `MemoryFrames`，便于在流水线之外检查调用次数
struct SharedFrames(Arc<MemoryFrames>);

impl FrameSource for SharedFrames {
    fn extract_frames(&self, path: &Path) -> Result<FrameSet> {
        self.0.extract_frames(path)
    }

    fn get_info(&self, path: &Path) -> Result<VideoInfo> {
        self.0.get_info(path)
    }
}

fn info_for(count: usize) -> VideoInfo {
    VideoInfo { duration: count as f64, fps: 1., frame_count: Some(count as u64), ..Default::default() }
}

/// `unreachable://` 开头的地址无法下载，其余地址直接视为本地路径
struct MemoryResolver;

impl LocationResolver for MemoryResolver {
    fn is_remote(&self, location: &str) -> bool {
        location.starts_with("unreachable://")
    }

    fn materialize(&self, location: &str) -> Result<Materialized> {
        if self.is_remote(location) {
            return Err(Error::Download(location.to_string()));
        }
        Ok(Materialized::local(location))
    }
}

#[fixture]
fn frames() -> MemoryFrames {
    MemoryFrames::default()
        .video("red-1", RED, 5)
        .video("red-2", RED, 8)
        .video("red-3", RED, 13)
        .video("red-4", RED, 6)
        .video("green-1", GREEN, 5)
        .video("green-2", GREEN, 9)
        .video("green-3", GREEN, 7)
        .video("blue-1", BLUE, 5)
        .video("blue-2", BLUE, 5)
        .video("yellow-1", YELLOW, 5)
        .video("magenta-1", MAGENTA, 5)
        .video("empty", RED, 0)
}

fn pipeline(frames: MemoryFrames, index: IndexKind, dimension: usize) -> Pipeline {
    let settings = StoreSettings { dimension, index, threshold: 0.9, ..Default::default() };
    PipelineBuilder::new(frames, MemoryResolver).store_settings(settings).build().unwrap()
}

fn items(locations: &[&str]) -> Vec<WorkItem> {
    locations.iter().enumerate().map(|(i, loc)| WorkItem::new(*loc, i + 2)).collect()
}

/// 以序号集合表示的分组，便于比较不同运行之间的结果
fn groups_by_ordinal(report: &BatchReport) -> BTreeSet<BTreeSet<usize>> {
    report
        .groups
        .iter()
        .map(|group| group.ids.iter().map(|&id| report.result(id).unwrap().item.ordinal).collect())
        .collect()
}

#[rstest]
#[case(IndexKind::Flat)]
#[case(IndexKind::Hnsw)]
fn three_duplicates(frames: MemoryFrames, #[case] index: IndexKind) {
    let pipeline = pipeline(frames, index, 512);
    let report = pipeline.run_batch(items(&["red-1", "green-1", "red-2", "red-3"]), 2).unwrap();

    let stats = &report.statistics;
    assert_eq!(stats.total, 4);
    assert_eq!(stats.processed, 4);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.duplicates_found, 2);
    assert_eq!(report.groups.len(), 1);
    assert_eq!(groups_by_ordinal(&report), BTreeSet::from([BTreeSet::from([2, 4, 5])]));
    assert_eq!(pipeline.store().len(), 4);
}

#[rstest]
fn unreachable_location(frames: MemoryFrames) {
    let pipeline = pipeline(frames, IndexKind::Flat, 512);
    let report = pipeline.run_batch(items(&["unreachable://a.com/1"]), 1).unwrap();

    let stats = &report.statistics;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.processed, 0);
    assert!(report.groups.is_empty());
    assert_eq!(stats.failures[0].kind, ErrorKind::TransientIo);
    assert_eq!(stats.failures[0].item.location, "unreachable://a.com/1");
}

#[rstest]
fn precondition_failures(frames: MemoryFrames) {
    let pipeline = pipeline(frames, IndexKind::Flat, 512);
    let report = pipeline.run_batch(items(&["empty", "missing", "red-1"]), 3).unwrap();

    let stats = &report.statistics;
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 2);
    let kinds = stats.failures.iter().map(|f| (f.item.location.as_str(), f.kind)).collect::<HashMap<_, _>>();
    assert_eq!(kinds["empty"], ErrorKind::Precondition);
    assert_eq!(kinds["missing"], ErrorKind::TransientIo);
}

#[rstest]
fn concurrency_does_not_change_result(#[values(IndexKind::Flat, IndexKind::Hnsw)] index: IndexKind) {
    let locations = [
        "red-1", "green-1", "blue-1", "red-2", "unreachable://x", "green-2", "yellow-1", "red-3",
        "blue-2", "missing", "green-3", "magenta-1", "red-4",
    ];

    let sequential = pipeline(frames(), index, 512).run_batch(items(&locations), 1).unwrap();
    let parallel = pipeline(frames(), index, 512).run_batch(items(&locations), 8).unwrap();

    for report in [&sequential, &parallel] {
        assert_eq!(report.statistics.processed, 11);
        assert_eq!(report.statistics.failed, 2);
        assert_eq!(report.statistics.duplicates_found, 6);
        assert_eq!(report.groups.len(), 3);
    }
    assert_eq!(groups_by_ordinal(&sequential), groups_by_ordinal(&parallel));
}

#[rstest]
fn cancel_before_start(frames: MemoryFrames) {
    let pipeline = pipeline(frames, IndexKind::Flat, 512);
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = pipeline
        .run_batch_with(items(&["red-1", "red-2"]), 2, &indicatif::ProgressBar::hidden(), &cancel)
        .unwrap();
    let stats = &report.statistics;
    assert!(stats.cancelled);
    assert_eq!(stats.processed + stats.failed, 0);
    assert_eq!(stats.skipped(), 2);
    assert!(report.groups.is_empty());
}

#[rstest]
fn cancel_keeps_in_flight_item(frames: MemoryFrames) {
    let cancel = CancelToken::new();
    let frames = MemoryFrames { cancel_on_extract: Some(cancel.clone()), ..frames };
    let pipeline = pipeline(frames, IndexKind::Flat, 512);

    let report = pipeline
        .run_batch_with(items(&["red-1", "red-2", "red-3"]), 1, &indicatif::ProgressBar::hidden(), &cancel)
        .unwrap();
    let stats = &report.statistics;
    assert!(stats.cancelled);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.skipped(), 2);
    assert_eq!(stats.duplicates_found, 0);
}

#[rstest]
fn check_failure_is_configuration_error(frames: MemoryFrames) {
    let frames = MemoryFrames { broken: true, ..frames };
    let result = PipelineBuilder::new(frames, MemoryResolver).build();
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[rstest]
fn invalid_settings(frames: MemoryFrames) {
    let settings = StoreSettings { top_k: 0, ..Default::default() };
    let result = PipelineBuilder::new(frames, MemoryResolver).store_settings(settings).build();
    assert!(matches!(result, Err(ref e) if e.kind() == ErrorKind::Configuration));
}

#[rstest]
fn fingerprint_has_fixed_dimension(frames: MemoryFrames, #[values(16, 484, 512)] dimension: usize) {
    let pipeline = pipeline(frames, IndexKind::Flat, dimension);
    let fp = pipeline.fingerprint("green-2").unwrap();
    assert_eq!(fp.vector.len(), dimension);
    assert_eq!(fp.meta.frame_count, 9);
    assert_eq!(fp.meta.duration, 9.);
    assert_eq!(fp.meta.origin, "green-2");
}

#[rstest]
fn video_info_read_once(frames: MemoryFrames) {
    let frames = Arc::new(MemoryFrames { attach_info: true, ..frames });
    let pipeline = PipelineBuilder::new(SharedFrames(frames.clone()), MemoryResolver).build().unwrap();
    let fp = pipeline.fingerprint("red-2").unwrap();
    assert_eq!(fp.meta.name, "attached");
    assert_eq!(fp.meta.duration, 8.);

    let report = pipeline.run_batch(items(&["red-1", "green-1"]), 2).unwrap();
    assert_eq!(report.statistics.processed, 2);
    assert_eq!(frames.info_calls.load(Ordering::SeqCst), 0);
}

#[rstest]
fn video_info_fallback(frames: MemoryFrames) {
    let frames = Arc::new(frames);
    let pipeline = PipelineBuilder::new(SharedFrames(frames.clone()), MemoryResolver).build().unwrap();
    pipeline.fingerprint("blue-1").unwrap();
    assert_eq!(frames.info_calls.load(Ordering::SeqCst), 1);
}

#[rstest]
fn projection_fitted_before_batch(frames: MemoryFrames) {
    let pipeline = pipeline(frames, IndexKind::Flat, 8);
    let mut locations = vec!["red-1", "green-1", "blue-1", "yellow-1", "magenta-1"];
    locations.extend(["red-2", "green-2", "blue-2", "red-3", "green-3"]);

    assert!(pipeline.prepare_projection(&items(&locations), locations.len()).unwrap());
    assert!(matches!(pipeline.normalizer().projection(), Some(Projection::Pca(_))));

    let report = pipeline.run_batch(items(&["red-1", "red-2", "blue-1", "blue-2"]), 2).unwrap();
    assert_eq!(report.statistics.duplicates_found, 2);
    assert_eq!(groups_by_ordinal(&report), BTreeSet::from([BTreeSet::from([2, 3]), BTreeSet::from([4, 5])]));
}
