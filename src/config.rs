use std::path::PathBuf;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::frame::FrameSampling;
use crate::store::{IndexKind, StoreSettings};

static CACHE_DIR: LazyLock<String> = LazyLock::new(|| match ProjectDirs::from("", "", "vidsearch") {
    Some(dirs) => dirs.cache_dir().join("downloads").to_string_lossy().into_owned(),
    None => std::env::temp_dir().join("vidsearch").to_string_lossy().into_owned(),
});

fn default_download_dir() -> &'static str {
    CACHE_DIR.as_str()
}

#[derive(Parser, Debug, Clone)]
pub struct FingerprintOptions {
    /// 指纹向量维数
    #[arg(long, value_name = "D", env = "VIDSEARCH_DIMENSION", default_value_t = 512)]
    pub dimension: usize,
    /// 抽帧间隔，每隔多少帧取一帧
    #[arg(long, value_name = "N", env = "VIDSEARCH_FRAME_INTERVAL", default_value_t = 15)]
    pub frame_interval: u32,
    /// 每个视频最少抽取的帧数，视频较短时会自动缩小抽帧间隔
    #[arg(long, value_name = "N", env = "VIDSEARCH_MIN_FRAMES", default_value_t = 5)]
    pub min_frames: u32,
    /// 每个视频最多抽取的帧数
    #[arg(long, value_name = "N", env = "VIDSEARCH_MAX_FRAMES", default_value_t = 100)]
    pub max_frames: u32,
    /// 帧缩放尺寸
    #[arg(long, value_name = "WIDTHxHEIGHT", env = "VIDSEARCH_FRAME_SIZE", value_parser = parse_size, default_value = "224x224")]
    pub frame_size: (u32, u32),
    /// 拟合 PCA 投影使用的视频数量，0 表示不拟合
    /// 仅当指纹维数小于原始特征维数时生效
    #[arg(long, value_name = "N", env = "VIDSEARCH_PCA_SAMPLES", default_value_t = 0, verbatim_doc_comment)]
    pub pca_samples: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct StoreOptions {
    /// 向量索引类型
    #[arg(long, value_enum, env = "VIDSEARCH_INDEX", default_value_t = IndexKind::Hnsw)]
    pub index: IndexKind,
    /// 相似度阈值，范围从 0 到 1
    #[arg(short, long, value_name = "THRESHOLD", env = "VIDSEARCH_THRESHOLD", default_value_t = 0.9)]
    pub threshold: f32,
    /// 每个视频搜索的相似视频数量
    #[arg(long, value_name = "K", env = "VIDSEARCH_TOP_K", default_value_t = 5)]
    pub top_k: usize,
    /// HNSW 搜索时每次访问的节点数量
    #[arg(long, env = "VIDSEARCH_EF_SEARCH", default_value_t = 64)]
    pub ef_search: usize,
    /// 预计存放的视频数量
    #[arg(long, env = "VIDSEARCH_CAPACITY", default_value_t = 100_000)]
    pub capacity: usize,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "vidsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    #[command(flatten)]
    pub fingerprint: FingerprintOptions,
    /// 远程视频的下载目录
    #[arg(long, global = true, env = "VIDSEARCH_DOWNLOAD_DIR", default_value = default_download_dir())]
    pub download_dir: PathBuf,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 批量处理视频并查找重复
    Batch(BatchCommand),
    /// 比较两个视频的相似度
    Compare(CompareCommand),
    /// 输出视频的指纹向量
    Fingerprint(FingerprintCommand),
}

impl From<&FingerprintOptions> for FrameSampling {
    fn from(opts: &FingerprintOptions) -> Self {
        Self {
            interval: opts.frame_interval,
            min_frames: opts.min_frames,
            max_frames: opts.max_frames,
            size: opts.frame_size,
        }
    }
}

impl StoreOptions {
    pub fn settings(&self, dimension: usize) -> StoreSettings {
        StoreSettings {
            dimension,
            index: self.index,
            threshold: self.threshold,
            top_k: self.top_k,
            ef_search: self.ef_search,
            capacity: self.capacity,
        }
    }
}

fn parse_size(s: &str) -> anyhow::Result<(u32, u32)> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(anyhow::anyhow!("无效的尺寸: {}", s));
    }
    let size = (parts[0].parse()?, parts[1].parse()?);
    if size.0 < 3 || size.1 < 3 {
        return Err(anyhow::anyhow!("尺寸过小: {}", s));
    }
    Ok(size)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("224x224").unwrap(), (224, 224));
        assert_eq!(parse_size("320x180").unwrap(), (320, 180));
        assert!(parse_size("224").is_err());
        assert!(parse_size("1x1").is_err());
    }

    #[test]
    fn test_parse_opts() {
        let opts = Opts::try_parse_from([
            "vidsearch",
            "--dimension",
            "256",
            "batch",
            "--dir",
            "videos",
            "--threshold",
            "0.8",
            "--workers",
            "2",
        ])
        .unwrap();
        assert_eq!(opts.fingerprint.dimension, 256);
        let SubCommand::Batch(batch) = opts.subcmd else { panic!("expected batch") };
        assert_eq!(batch.store.threshold, 0.8);
        assert_eq!(batch.workers, Some(2));

        let sampling = FrameSampling::from(&opts.fingerprint);
        assert_eq!(sampling.size, (224, 224));
    }

    #[test]
    fn test_batch_requires_source() {
        assert!(Opts::try_parse_from(["vidsearch", "batch"]).is_err());
        assert!(Opts::try_parse_from(["vidsearch", "batch", "--csv", "a.csv", "--dir", "b"]).is_err());
        assert!(Opts::try_parse_from(["vidsearch", "batch", "--dir", "b", "--encoding", "gbk"]).is_err());

        let opts = Opts::try_parse_from(["vidsearch", "batch", "--csv", "a.csv", "--encoding", "gbk"]).unwrap();
        let SubCommand::Batch(batch) = opts.subcmd else { panic!("expected batch") };
        assert_eq!(batch.encoding.as_deref(), Some("gbk"));
    }
}
