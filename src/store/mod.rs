mod flat;
mod hnsw;

use std::collections::HashMap;

use clap::ValueEnum;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use flat::FlatStore;
pub use hnsw::HnswStore;

use crate::error::{Error, Result};

/// 向量库分配的指纹 id，从 1 开始递增
pub type FingerprintId = usize;

/// 底层最近邻索引，不要求线程安全，由 [`SimilarityStore`] 统一加锁
pub trait VectorStore: Send {
    fn add(&mut self, id: FingerprintId, vector: &[f32]);

    /// 返回距离最近的至多 `k` 个 (id, 距离)，按距离升序
    fn search(&self, vector: &[f32], k: usize) -> Vec<(FingerprintId, f32)>;

    fn remove(&mut self, id: FingerprintId);

    fn len(&self) -> usize;
}

/// 索引类型
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// HNSW 近似最近邻索引
    Hnsw,
    /// 精确线性扫描
    Flat,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// 向量维数 D
    pub dimension: usize,
    pub index: IndexKind,
    /// 相似度阈值，范围 [0, 1]
    pub threshold: f32,
    /// 每次搜索返回的候选数量
    pub top_k: usize,
    pub ef_search: usize,
    /// 预计存放的向量数量
    pub capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            dimension: 512,
            index: IndexKind::Hnsw,
            threshold: 0.9,
            top_k: 5,
            ef_search: 64,
            capacity: 100_000,
        }
    }
}

/// 随指纹一起存储的视频信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FingerprintMeta {
    /// 显示名称
    pub name: String,
    /// 时长，单位为秒
    pub duration: f64,
    pub frame_count: usize,
    /// 视频来源（本地路径或 URL）
    pub origin: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredFingerprint {
    pub id: FingerprintId,
    pub vector: Vec<f32>,
    pub meta: FingerprintMeta,
}

/// 一条搜索结果
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: FingerprintId,
    pub meta: FingerprintMeta,
    /// 相似度，1 表示完全相同
    pub similarity: f32,
}

struct StoreState {
    backend: Box<dyn VectorStore>,
    records: HashMap<FingerprintId, StoredFingerprint>,
    next_id: FingerprintId,
    closed: bool,
}

/// 线程安全的相似向量库
///
/// 所有操作都在同一把锁内完成，底层索引无需自身支持并发。
pub struct SimilarityStore {
    dimension: usize,
    state: Mutex<StoreState>,
}

impl SimilarityStore {
    pub fn new(dimension: usize, backend: Box<dyn VectorStore>) -> Self {
        let state = StoreState { backend, records: HashMap::new(), next_id: 1, closed: false };
        Self { dimension, state: Mutex::new(state) }
    }

    pub fn from_settings(settings: &StoreSettings) -> Result<Self> {
        if settings.dimension == 0 {
            return Err(Error::Configuration("向量维数必须大于 0".to_string()));
        }
        if !(0. ..=1.).contains(&settings.threshold) {
            return Err(Error::Configuration(format!(
                "相似度阈值必须在 [0, 1] 内: {}",
                settings.threshold
            )));
        }
        let backend: Box<dyn VectorStore> = match settings.index {
            IndexKind::Hnsw => Box::new(HnswStore::new(settings.capacity, settings.ef_search)),
            IndexKind::Flat => Box::new(FlatStore::new()),
        };
        Ok(Self::new(settings.dimension, backend))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 插入一个指纹并返回新分配的 id
    pub fn insert(&self, vector: Vec<f32>, meta: FingerprintMeta) -> Result<FingerprintId> {
        let mut state = self.state.lock();
        self.insert_locked(&mut state, vector, meta)
    }

    /// 搜索相似度不低于 `threshold` 的至多 `k` 个指纹，按相似度降序
    pub fn search(&self, vector: &[f32], k: usize, threshold: f32) -> Result<Vec<SearchHit>> {
        let state = self.state.lock();
        self.search_locked(&state, vector, k, threshold)
    }

    /// 先搜索再插入，两步在同一临界区内完成
    ///
    /// 保证两个同时处理的相似视频中，后插入的一方一定能搜索到先插入的一方。
    pub fn search_then_insert(
        &self,
        vector: Vec<f32>,
        meta: FingerprintMeta,
        k: usize,
        threshold: f32,
    ) -> Result<(FingerprintId, Vec<SearchHit>)> {
        let mut state = self.state.lock();
        let hits = self.search_locked(&state, &vector, k, threshold)?;
        let id = self.insert_locked(&mut state, vector, meta)?;
        Ok((id, hits))
    }

    pub fn get(&self, id: FingerprintId) -> Result<Option<StoredFingerprint>> {
        let state = self.state.lock();
        Self::check_open(&state)?;
        Ok(state.records.get(&id).cloned())
    }

    /// 删除指纹，返回其是否存在
    pub fn delete(&self, id: FingerprintId) -> Result<bool> {
        let mut state = self.state.lock();
        Self::check_open(&state)?;
        if state.records.remove(&id).is_none() {
            return Ok(false);
        }
        state.backend.remove(id);
        debug!("删除指纹 {}", id);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 关闭向量库，之后的所有操作都返回 `StoreUnavailable`
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    fn check_open(state: &StoreState) -> Result<()> {
        if state.closed {
            return Err(Error::StoreUnavailable("向量库已关闭".to_string()));
        }
        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch { expected: self.dimension, actual: vector.len() });
        }
        Ok(())
    }

    fn insert_locked(
        &self,
        state: &mut StoreState,
        vector: Vec<f32>,
        meta: FingerprintMeta,
    ) -> Result<FingerprintId> {
        Self::check_open(state)?;
        self.check_dimension(&vector)?;

        let id = state.next_id;
        state.next_id += 1;
        state.backend.add(id, &vector);
        state.records.insert(id, StoredFingerprint { id, vector, meta });
        Ok(id)
    }

    fn search_locked(
        &self,
        state: &StoreState,
        vector: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let mut hits = self.candidates_locked(state, vector, k)?;
        for hit in &hits {
            debug!(
                "候选 {}: 相似度 {:.4} {}",
                hit.id,
                hit.similarity,
                if hit.similarity >= threshold { "通过" } else { "未达阈值" }
            );
        }
        hits.retain(|hit| hit.similarity >= threshold);
        Ok(hits)
    }

    /// 不经过阈值过滤的前 `k` 个候选，按相似度降序
    pub fn candidates(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let state = self.state.lock();
        self.candidates_locked(&state, vector, k)
    }

    fn candidates_locked(&self, state: &StoreState, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        Self::check_open(state)?;
        self.check_dimension(vector)?;

        let mut hits = state
            .backend
            .search(vector, k)
            .into_iter()
            .filter_map(|(id, distance)| {
                let record = state.records.get(&id)?;
                Some(SearchHit { id, meta: record.meta.clone(), similarity: distance_to_similarity(distance) })
            })
            .collect::<Vec<_>>();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity).then(a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }
}

/// 距离越小相似度越高，距离为 0 时相似度为 1
pub fn distance_to_similarity(distance: f32) -> f32 {
    1. / (1. + distance.max(0.))
}

/// 两个向量之间的相似度
pub fn similarity(va: &[f32], vb: &[f32]) -> f32 {
    distance_to_similarity(squared_l2(va, vb))
}

pub(crate) fn squared_l2(va: &[f32], vb: &[f32]) -> f32 {
    va.iter().zip(vb).map(|(a, b)| (a - b) * (a - b)).sum()
}
