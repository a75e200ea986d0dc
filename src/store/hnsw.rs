use std::collections::HashSet;

use hnsw_rs::prelude::*;

use super::{FingerprintId, VectorStore, squared_l2};

/// 平方欧氏距离
struct DistSquaredL2;

impl Distance<f32> for DistSquaredL2 {
    fn eval(&self, va: &[f32], vb: &[f32]) -> f32 {
        squared_l2(va, vb)
    }
}

/// 基于 HNSW 图的近似最近邻索引
///
/// hnsw_rs 不支持删除节点，删除的 id 记录为墓碑并在搜索时过滤。
pub struct HnswStore {
    index: Hnsw<'static, f32, DistSquaredL2>,
    ef_search: usize,
    deleted: HashSet<FingerprintId>,
}

impl HnswStore {
    pub fn new(capacity: usize, ef_search: usize) -> Self {
        let index = Hnsw::<f32, _>::new(32, capacity.max(1), 16, 128, DistSquaredL2);
        Self { index, ef_search, deleted: HashSet::new() }
    }
}

impl VectorStore for HnswStore {
    fn add(&mut self, id: FingerprintId, vector: &[f32]) {
        self.deleted.remove(&id);
        self.index.insert((vector, id));
    }

    fn search(&self, vector: &[f32], k: usize) -> Vec<(FingerprintId, f32)> {
        if k == 0 || self.len() == 0 {
            return vec![];
        }
        let knbn = k + self.deleted.len();
        self.index
            .search(vector, knbn, self.ef_search.max(knbn))
            .into_iter()
            .filter(|n| !self.deleted.contains(&n.d_id))
            .map(|n| (n.d_id, n.distance))
            .take(k)
            .collect()
    }

    fn remove(&mut self, id: FingerprintId) {
        self.deleted.insert(id);
    }

    fn len(&self) -> usize {
        self.index.get_nb_point() - self.deleted.len()
    }
}
