use super::{FingerprintId, VectorStore, squared_l2};

/// 精确的线性扫描索引，适合小规模数据与测试
#[derive(Debug, Default)]
pub struct FlatStore {
    vectors: Vec<(FingerprintId, Vec<f32>)>,
}

impl FlatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorStore for FlatStore {
    fn add(&mut self, id: FingerprintId, vector: &[f32]) {
        self.vectors.push((id, vector.to_vec()));
    }

    fn search(&self, vector: &[f32], k: usize) -> Vec<(FingerprintId, f32)> {
        let mut result = self
            .vectors
            .iter()
            .map(|(id, v)| (*id, squared_l2(vector, v)))
            .collect::<Vec<_>>();
        result.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        result.truncate(k);
        result
    }

    fn remove(&mut self, id: FingerprintId) {
        self.vectors.retain(|(i, _)| *i != id);
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}
