use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::store::FingerprintId;

/// 两个相似度超过阈值的指纹
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityEdge {
    pub a: FingerprintId,
    pub b: FingerprintId,
    pub similarity: f32,
}

impl SimilarityEdge {
    /// 边是无向的，总是将较小的 id 放在前面
    pub fn new(a: FingerprintId, b: FingerprintId, similarity: f32) -> Self {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        Self { a, b, similarity }
    }
}

/// 一组互为重复的视频，id 按入库顺序升序排列，第一个视为原始视频
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub ids: Vec<FingerprintId>,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn original(&self) -> Option<FingerprintId> {
        self.ids.first().copied()
    }

    pub fn duplicates(&self) -> &[FingerprintId] {
        self.ids.get(1..).unwrap_or_default()
    }
}

/// 基于数组的并查集，按集合大小合并并做路径压缩
#[derive(Debug, Clone, Default)]
pub struct DisjointSet {
    index: HashMap<FingerprintId, usize>,
    ids: Vec<FingerprintId>,
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: FingerprintId) -> bool {
        self.index.contains_key(&id)
    }

    /// 添加一个单元素集合，已存在时不做任何事
    pub fn add(&mut self, id: FingerprintId) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.ids.len();
        self.index.insert(id, idx);
        self.ids.push(id);
        self.parent.push(idx);
        self.size.push(1);
        idx
    }

    /// 返回 `id` 所在集合的代表元素
    pub fn find(&mut self, id: FingerprintId) -> Option<FingerprintId> {
        let idx = *self.index.get(&id)?;
        let root = self.find_root(idx);
        Some(self.ids[root])
    }

    /// 合并两个元素所在的集合，不存在的元素会先被添加，返回是否发生了合并
    pub fn union(&mut self, a: FingerprintId, b: FingerprintId) -> bool {
        let a = self.add(a);
        let b = self.add(b);
        let (ra, rb) = (self.find_root(a), self.find_root(b));
        if ra == rb {
            return false;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] { (ra, rb) } else { (rb, ra) };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        true
    }

    /// 按代表元素分组返回所有集合
    pub fn sets(&mut self) -> Vec<Vec<FingerprintId>> {
        let mut sets = BTreeMap::<usize, Vec<FingerprintId>>::new();
        for idx in 0..self.ids.len() {
            let root = self.find_root(idx);
            sets.entry(root).or_default().push(self.ids[idx]);
        }
        sets.into_values().collect()
    }

    fn find_root(&mut self, idx: usize) -> usize {
        let mut root = idx;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = idx;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }
}

/// 聚类结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct Clustering {
    pub groups: Vec<DuplicateGroup>,
    /// 每组中除第一个以外的视频数之和
    pub duplicates_found: usize,
}

/// 对本批次成功入库的指纹按相似边做传递闭包，返回包含至少两个指纹的分组
///
/// 指向批次外指纹的边同样参与合并，但批次外的 id 不会出现在结果中。
pub fn build_groups(
    ids: impl IntoIterator<Item = FingerprintId>,
    edges: &[SimilarityEdge],
) -> Clustering {
    let mut set = DisjointSet::new();
    let members = ids.into_iter().inspect(|&id| {
        set.add(id);
    }).collect::<HashSet<_>>();

    for edge in edges {
        set.union(edge.a, edge.b);
    }

    let mut groups = set
        .sets()
        .into_iter()
        .map(|mut ids| {
            ids.retain(|id| members.contains(id));
            ids.sort_unstable();
            DuplicateGroup { ids }
        })
        .filter(|group| group.len() >= 2)
        .collect::<Vec<_>>();
    groups.sort_by_key(|group| group.ids[0]);

    let duplicates_found = groups.iter().map(|group| group.len() - 1).sum();
    Clustering { groups, duplicates_found }
}
