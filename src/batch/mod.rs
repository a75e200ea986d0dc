mod types;

use std::path::Path;
use std::time::Instant;

use indicatif::ProgressBar;
use log::{debug, info, warn};
use parking_lot::Mutex;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::Serialize;

pub use types::*;

use crate::cluster::{SimilarityEdge, build_groups};
use crate::error::{Error, Result};
use crate::feature::{FeatureBuilder, RAW_DIM};
use crate::frame::{FrameSet, FrameSource};
use crate::location::{LocationResolver, Materialized, RemoteInfo};
use crate::normalize::DimensionNormalizer;
use crate::store::{FingerprintMeta, SimilarityStore, StoreSettings};

/// 默认并发数：CPU 核数减一，至少为 1
pub fn default_workers() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// 一个视频的指纹
#[derive(Debug, Clone, Serialize)]
pub struct Fingerprint {
    pub vector: Vec<f32>,
    pub meta: FingerprintMeta,
    pub remote: Option<RemoteInfo>,
}

pub struct PipelineBuilder {
    frames: Box<dyn FrameSource>,
    resolver: Box<dyn LocationResolver>,
    store: StoreSettings,
}

impl PipelineBuilder {
    pub fn new(
        frames: impl FrameSource + 'static,
        resolver: impl LocationResolver + 'static,
    ) -> Self {
        Self { frames: Box::new(frames), resolver: Box::new(resolver), store: StoreSettings::default() }
    }

    pub fn store_settings(mut self, settings: StoreSettings) -> Self {
        self.store = settings;
        self
    }

    /// 检查配置与解码器，任何问题都会使整个批处理无法开始
    pub fn build(self) -> Result<Pipeline> {
        if self.store.top_k == 0 {
            return Err(Error::Configuration("top_k 必须大于 0".to_string()));
        }
        let store = SimilarityStore::from_settings(&self.store)?;
        self.frames.check().map_err(|e| match e {
            Error::Configuration(_) => e,
            e => Error::Configuration(e.to_string()),
        })?;

        Ok(Pipeline {
            frames: self.frames,
            resolver: self.resolver,
            features: FeatureBuilder::new(),
            normalizer: DimensionNormalizer::new(self.store.dimension),
            store,
            threshold: self.store.threshold,
            top_k: self.store.top_k,
        })
    }
}

/// 视频去重流水线：抽帧 -> 特征 -> 降维 -> 搜索并入库 -> 聚类
pub struct Pipeline {
    frames: Box<dyn FrameSource>,
    resolver: Box<dyn LocationResolver>,
    features: FeatureBuilder,
    normalizer: DimensionNormalizer,
    store: SimilarityStore,
    threshold: f32,
    top_k: usize,
}

impl Pipeline {
    pub fn store(&self) -> &SimilarityStore {
        &self.store
    }

    pub fn normalizer(&self) -> &DimensionNormalizer {
        &self.normalizer
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// 计算视频的原始特征向量（未降维）
    pub fn raw_features(&self, location: &str) -> Result<(Vec<f32>, FingerprintMeta, Option<RemoteInfo>)> {
        let local = self.resolver.materialize(location)?;
        let frames = self.frames.extract_frames(local.path())?;
        let raw = self.features.build(&frames)?;
        let meta = self.describe(location, &local, frames);
        Ok((raw, meta, local.remote_info().cloned()))
    }

    /// 计算视频的 `D` 维指纹
    pub fn fingerprint(&self, location: &str) -> Result<Fingerprint> {
        let (raw, meta, remote) = self.raw_features(location)?;
        let vector = self.normalizer.normalize(raw)?;
        Ok(Fingerprint { vector, meta, remote })
    }

    /// 处理单个视频：计算指纹，搜索相似视频后入库
    pub fn process_item(&self, item: &WorkItem) -> Result<ItemResult> {
        let start = Instant::now();
        debug!("开始处理 #{}: {}", item.ordinal, item.location);

        let fingerprint = self.fingerprint(&item.location)?;
        let (id, similar) = self.store.search_then_insert(
            fingerprint.vector,
            fingerprint.meta.clone(),
            self.top_k,
            self.threshold,
        )?;

        if !similar.is_empty() {
            let summary = similar
                .iter()
                .map(|hit| format!("{}({:.4})", hit.id, hit.similarity))
                .collect::<Vec<_>>()
                .join(", ");
            debug!("#{} 入库为 {}，相似视频: {}", item.ordinal, id, summary);
        }

        Ok(ItemResult {
            id,
            item: item.clone(),
            meta: fingerprint.meta,
            similar,
            remote: fingerprint.remote,
            elapsed: start.elapsed().as_secs_f64(),
        })
    }

    /// 用前 `samples` 个视频的原始特征拟合降维投影
    ///
    /// 原始特征维数不超过 `D` 时无需投影，直接返回。
    pub fn prepare_projection(&self, items: &[WorkItem], samples: usize) -> Result<bool> {
        if RAW_DIM <= self.normalizer.dimension() || samples == 0 {
            return Ok(false);
        }
        let samples = samples.max(self.normalizer.min_samples());
        info!("使用 {} 个视频拟合 PCA 投影", samples.min(items.len()));

        let raws = items
            .par_iter()
            .take(samples)
            .filter_map(|item| match self.raw_features(&item.location) {
                Ok((raw, _, _)) => Some(raw),
                Err(e) => {
                    warn!("计算 {} 的特征失败: {}", item.location, e);
                    None
                }
            })
            .collect::<Vec<_>>();
        self.normalizer.fit(&raws)
    }

    pub fn run_batch(&self, items: Vec<WorkItem>, workers: usize) -> Result<BatchReport> {
        self.run_batch_with(items, workers, &ProgressBar::hidden(), &CancelToken::new())
    }

    /// 使用 `workers` 个线程并行处理所有视频
    ///
    /// 单个视频的失败只会记入失败列表；取消后不再开始新的视频，已开始的视频照常完成，
    /// 返回的报告只包含已完成部分。
    pub fn run_batch_with(
        &self,
        items: Vec<WorkItem>,
        workers: usize,
        pb: &ProgressBar,
        cancel: &CancelToken,
    ) -> Result<BatchReport> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("vidsearch-worker-{}", i))
            .build()
            .map_err(|e| Error::Configuration(format!("无法创建线程池: {}", e)))?;

        info!("开始处理 {} 个视频，并发数 {}，相似度阈值 {}", items.len(), workers, self.threshold);
        let start = Instant::now();
        pb.set_length(items.len() as u64);

        // 统计信息与相似边共用一把锁，与向量库的锁相互独立
        let state = Mutex::new((
            BatchStatistics { total: items.len(), ..Default::default() },
            Vec::<SimilarityEdge>::new(),
        ));

        pool.install(|| {
            items.par_iter().with_max_len(1).for_each(|item| {
                if cancel.is_cancelled() {
                    return;
                }
                pb.set_message(item.location.clone());

                match self.process_item(item) {
                    Ok(result) => {
                        let mut state = state.lock();
                        let (stats, edges) = &mut *state;
                        edges.extend(
                            result.similar.iter().map(|hit| SimilarityEdge::new(result.id, hit.id, hit.similarity)),
                        );
                        stats.processed += 1;
                        stats.results.push(result);
                    }
                    Err(e) => {
                        warn!("处理 #{} {} 失败: {}", item.ordinal, item.location, e);
                        let failed = FailedItem { item: item.clone(), error: e.to_string(), kind: e.kind() };
                        let mut state = state.lock();
                        state.0.failed += 1;
                        state.0.failures.push(failed);
                    }
                }
                pb.inc(1);
            });
        });

        let (mut stats, edges) = state.into_inner();
        stats.cancelled = cancel.is_cancelled();
        stats.elapsed = start.elapsed().as_secs_f64();

        let clustering = build_groups(stats.results.iter().map(|r| r.id), &edges);
        stats.duplicates_found = clustering.duplicates_found;

        if stats.cancelled {
            warn!("批处理已取消，{} 个视频未处理", stats.skipped());
        }
        info!(
            "处理完成：成功 {}，失败 {}，耗时 {:.2}s，发现 {} 组重复视频",
            stats.processed,
            stats.failed,
            stats.elapsed,
            clustering.groups.len()
        );

        Ok(BatchReport::new(stats, self.threshold, edges, clustering.groups))
    }

    fn describe(&self, location: &str, local: &Materialized, frames: FrameSet) -> FingerprintMeta {
        let frame_count = frames.len();
        let info = match frames.info() {
            Some(info) => info.clone(),
            None => self.frames.get_info(local.path()).unwrap_or_else(|e| {
                warn!("获取视频信息失败 {}: {}", location, e);
                Default::default()
            }),
        };
        let remote = local.remote_info();

        let name = remote
            .and_then(|r| r.title.clone())
            .or(info.title)
            .or_else(|| file_name(local.path()))
            .unwrap_or_else(|| location.to_string());
        let duration = remote.and_then(|r| r.duration).unwrap_or(info.duration);

        FingerprintMeta { name, duration, frame_count, origin: location.to_string() }
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|s| s.to_string_lossy().into_owned())
}
