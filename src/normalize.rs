use std::sync::OnceLock;

use log::{debug, info, warn};
use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;

use crate::error::{Error, Result};

/// 子空间迭代次数
const PCA_ITERATIONS: usize = 40;
const PCA_SEED: u64 = 0x5eed;

/// 已确定的降维方式，确定后整个进程生命周期内不再改变
#[derive(Debug)]
pub enum Projection {
    Pca(Pca),
    Truncate,
}

/// 将任意长度的原始特征向量映射到固定维数 `D`
///
/// 原始向量短于 `D` 时补零，等于 `D` 时原样返回；长于 `D` 时使用
/// 拟合好的 PCA 投影，若在首次需要投影时仍未拟合，则退化为截断。
/// 无论哪种方式，一旦确定就不再重新拟合，保证已入库的指纹之间可比。
#[derive(Debug)]
pub struct DimensionNormalizer {
    dimension: usize,
    projection: OnceLock<Projection>,
}

impl DimensionNormalizer {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, projection: OnceLock::new() }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// PCA 拟合需要的最少样本数
    pub fn min_samples(&self) -> usize {
        self.dimension + 1
    }

    pub fn projection(&self) -> Option<&Projection> {
        self.projection.get()
    }

    /// 使用参考样本拟合 PCA 投影
    ///
    /// 只有第一次成功的拟合生效，返回是否由本次调用完成拟合。
    /// 样本不足或维数不超过 `D` 时不做任何事。
    pub fn fit(&self, samples: &[Vec<f32>]) -> Result<bool> {
        if self.projection.get().is_some() {
            debug!("投影方式已确定，忽略重复拟合");
            return Ok(false);
        }
        let Some(first) = samples.first() else {
            return Ok(false);
        };
        let input_dim = first.len();
        if input_dim <= self.dimension {
            return Ok(false);
        }
        if samples.len() < self.min_samples() {
            warn!(
                "PCA 样本数不足（{} < {}），暂不拟合",
                samples.len(),
                self.min_samples()
            );
            return Ok(false);
        }
        if let Some(bad) = samples.iter().find(|s| s.len() != input_dim) {
            return Err(Error::DimensionMismatch { expected: input_dim, actual: bad.len() });
        }

        let pca = Pca::fit(samples, self.dimension, PCA_SEED);
        let mut fitted = false;
        self.projection.get_or_init(|| {
            fitted = true;
            Projection::Pca(pca)
        });
        if fitted {
            info!("PCA 拟合完成: {} 个样本，{} -> {} 维", samples.len(), input_dim, self.dimension);
        }
        Ok(fitted)
    }

    /// 将原始向量转换为 `D` 维
    pub fn normalize(&self, mut raw: Vec<f32>) -> Result<Vec<f32>> {
        if raw.len() <= self.dimension {
            raw.resize(self.dimension, 0.);
            return Ok(raw);
        }

        let projection = self.projection.get_or_init(|| {
            warn!(
                "未拟合 PCA 投影，{} 维特征将截断为前 {} 维",
                raw.len(),
                self.dimension
            );
            Projection::Truncate
        });

        match projection {
            Projection::Pca(pca) => pca.transform(&raw),
            Projection::Truncate => {
                raw.truncate(self.dimension);
                Ok(raw)
            }
        }
    }
}

/// 主成分分析投影
#[derive(Debug, Clone)]
pub struct Pca {
    mean: Array1<f64>,
    /// (k, m)，每行一个主成分
    components: Array2<f64>,
    explained_variance: Vec<f64>,
}

impl Pca {
    /// 使用子空间迭代求协方差矩阵的前 `k` 个特征向量
    ///
    /// 调用方需保证样本非空、维数一致且 `k` 不超过样本维数。
    pub fn fit(samples: &[Vec<f32>], k: usize, seed: u64) -> Self {
        let n = samples.len();
        let m = samples.first().map(Vec::len).unwrap_or(0);
        let k = k.min(m);

        let mut data = Array2::<f64>::zeros((n, m));
        for (mut row, sample) in data.axis_iter_mut(Axis(0)).zip(samples) {
            row.iter_mut().zip(sample).for_each(|(d, &s)| *d = s as f64);
        }
        let mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(m));
        data -= &mean;
        let cov = data.t().dot(&data) / (n.max(2) - 1) as f64;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut basis = Array2::<f64>::from_shape_fn((m, k), |_| rng.random::<f64>() - 0.5);
        orthonormalize(&mut basis, &mut rng);
        for _ in 0..PCA_ITERATIONS {
            basis = cov.dot(&basis);
            orthonormalize(&mut basis, &mut rng);
        }

        // 按方差从大到小排序
        let variance = (0..k)
            .map(|j| {
                let q = basis.column(j);
                q.dot(&cov.dot(&q))
            })
            .collect::<Vec<_>>();
        let mut order = (0..k).collect::<Vec<_>>();
        order.sort_by(|&a, &b| variance[b].total_cmp(&variance[a]));

        let mut components = Array2::<f64>::zeros((k, m));
        for (i, &j) in order.iter().enumerate() {
            let mut row = components.row_mut(i);
            row.assign(&basis.column(j));
            // 固定符号：绝对值最大的分量为正
            let pivot = row.iter().copied().fold(0f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
            if pivot < 0. {
                row.mapv_inplace(|x| -x);
            }
        }
        let explained_variance = order.iter().map(|&j| variance[j]).collect();

        Self { mean, components, explained_variance }
    }

    pub fn input_dim(&self) -> usize {
        self.mean.len()
    }

    pub fn output_dim(&self) -> usize {
        self.components.nrows()
    }

    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    pub fn transform(&self, raw: &[f32]) -> Result<Vec<f32>> {
        if raw.len() != self.input_dim() {
            return Err(Error::DimensionMismatch { expected: self.input_dim(), actual: raw.len() });
        }
        let x = Array1::from_iter(raw.iter().map(|&v| v as f64)) - &self.mean;
        Ok(self.components.dot(&x).iter().map(|&v| v as f32).collect())
    }
}

/// 修正 Gram-Schmidt 正交化，退化的列用随机向量替换
fn orthonormalize(basis: &mut Array2<f64>, rng: &mut StdRng) {
    let (m, k) = basis.dim();
    for j in 0..k {
        for attempt in 0..3 {
            for i in 0..j {
                let proj = basis.column(i).dot(&basis.column(j));
                let prev = basis.column(i).to_owned();
                basis.column_mut(j).scaled_add(-proj, &prev);
            }
            let norm = basis.column(j).dot(&basis.column(j)).sqrt();
            if norm > 1e-10 {
                basis.column_mut(j).mapv_inplace(|x| x / norm);
                break;
            }
            if attempt == 2 {
                basis.column_mut(j).fill(0.);
            } else {
                basis.column_mut(j).assign(&Array1::from_shape_fn(m, |_| rng.random::<f64>() - 0.5));
            }
        }
    }
}
