use clap::Parser;
use tokio::task::block_in_place;

use super::build_pipeline;
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::store::{StoreSettings, similarity};
use crate::utils::format_duration;

#[derive(Parser, Debug, Clone)]
pub struct CompareCommand {
    /// 第一个视频的路径或 URL
    pub first: String,
    /// 第二个视频的路径或 URL
    pub second: String,
    /// 相似度阈值，范围从 0 到 1
    #[arg(short, long, value_name = "THRESHOLD", env = "VIDSEARCH_THRESHOLD", default_value_t = 0.9)]
    pub threshold: f32,
}

impl SubCommandExtend for CompareCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let settings = StoreSettings {
            dimension: opts.fingerprint.dimension,
            threshold: self.threshold,
            ..Default::default()
        };
        let pipeline = build_pipeline(opts, settings)?;

        let (first, second) = block_in_place(|| {
            rayon::join(|| pipeline.fingerprint(&self.first), || pipeline.fingerprint(&self.second))
        });
        let (first, second) = (first?, second?);

        for fp in [&first, &second] {
            println!(
                "{}\t{}\t{} 帧\t{}",
                fp.meta.name,
                format_duration(fp.meta.duration),
                fp.meta.frame_count,
                fp.meta.origin
            );
        }
        let sim = similarity(&first.vector, &second.vector);
        let verdict = if sim >= self.threshold { "重复" } else { "不重复" };
        println!("相似度: {:.4} ({})", sim, verdict);

        Ok(())
    }
}
