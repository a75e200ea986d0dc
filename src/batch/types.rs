use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::cluster::{DuplicateGroup, SimilarityEdge};
use crate::error::ErrorKind;
use crate::location::RemoteInfo;
use crate::store::{FingerprintId, FingerprintMeta, SearchHit};

/// 待处理的一个视频
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkItem {
    /// 本地路径或 URL
    pub location: String,
    /// 来源中的序号，例如 CSV 行号
    pub ordinal: usize,
    /// 原样带到结果中的附加信息
    pub metadata: BTreeMap<String, String>,
}

impl WorkItem {
    pub fn new(location: impl Into<String>, ordinal: usize) -> Self {
        Self { location: location.into(), ordinal, metadata: BTreeMap::new() }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// 单个视频处理成功的结果
#[derive(Debug, Clone, Serialize)]
pub struct ItemResult {
    pub id: FingerprintId,
    pub item: WorkItem,
    pub meta: FingerprintMeta,
    /// 入库前搜索到的相似视频
    pub similar: Vec<SearchHit>,
    pub remote: Option<RemoteInfo>,
    /// 处理耗时，单位为秒
    pub elapsed: f64,
}

/// 单个视频处理失败的记录
#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub item: WorkItem,
    pub error: String,
    pub kind: ErrorKind,
}

/// 批处理统计信息，结果与失败列表按完成顺序排列
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStatistics {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub duplicates_found: usize,
    /// 总耗时，单位为秒
    pub elapsed: f64,
    /// 是否被中途取消
    pub cancelled: bool,
    pub results: Vec<ItemResult>,
    pub failures: Vec<FailedItem>,
}

impl BatchStatistics {
    /// 因取消而未处理的视频数量
    pub fn skipped(&self) -> usize {
        self.total.saturating_sub(self.processed + self.failed)
    }

    /// 平均每个视频的耗时
    pub fn average_elapsed(&self) -> f64 {
        let done = self.processed + self.failed;
        if done == 0 { 0. } else { self.elapsed / done as f64 }
    }

    /// 重复视频占成功处理视频的比例
    pub fn duplicate_rate(&self) -> f64 {
        if self.processed == 0 {
            0.
        } else {
            self.duplicates_found as f64 / self.processed as f64
        }
    }
}

/// 一次批处理的完整输出
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub statistics: BatchStatistics,
    pub threshold: f32,
    pub edges: Vec<SimilarityEdge>,
    pub groups: Vec<DuplicateGroup>,
    #[serde(skip)]
    index: HashMap<FingerprintId, usize>,
}

impl BatchReport {
    pub fn new(
        statistics: BatchStatistics,
        threshold: f32,
        edges: Vec<SimilarityEdge>,
        groups: Vec<DuplicateGroup>,
    ) -> Self {
        let index = statistics.results.iter().enumerate().map(|(i, r)| (r.id, i)).collect();
        Self { statistics, threshold, edges, groups, index }
    }

    /// 按指纹 id 查找处理结果
    pub fn result(&self, id: FingerprintId) -> Option<&ItemResult> {
        self.index.get(&id).map(|&i| &self.statistics.results[i])
    }
}

/// 取消整个批处理：已开始的视频继续完成，未开始的视频不再处理
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
