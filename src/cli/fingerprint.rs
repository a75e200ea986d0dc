use clap::Parser;
use serde_json::json;
use tokio::task::block_in_place;

use super::build_pipeline;
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::store::StoreSettings;

#[derive(Parser, Debug, Clone)]
pub struct FingerprintCommand {
    /// 视频路径或 URL
    pub video: String,
    /// 输出未降维的原始特征
    #[arg(long)]
    pub raw: bool,
}

impl SubCommandExtend for FingerprintCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let settings = StoreSettings { dimension: opts.fingerprint.dimension, ..Default::default() };
        let pipeline = build_pipeline(opts, settings)?;

        let (vector, meta) = block_in_place(|| -> anyhow::Result<_> {
            if self.raw {
                let (raw, meta, _) = pipeline.raw_features(&self.video)?;
                Ok((raw, meta))
            } else {
                let fp = pipeline.fingerprint(&self.video)?;
                Ok((fp.vector, fp.meta))
            }
        })?;

        let output = json!({
            "name": meta.name,
            "origin": meta.origin,
            "duration": meta.duration,
            "frame_count": meta.frame_count,
            "dimension": vector.len(),
            "vector": vector,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);

        Ok(())
    }
}
