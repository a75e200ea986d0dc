mod batch;
mod compare;
mod fingerprint;

pub use batch::*;
pub use compare::*;
pub use fingerprint::*;

use crate::batch::{Pipeline, PipelineBuilder};
use crate::config::Opts;
use crate::ffmpeg::FfmpegFrameSource;
use crate::frame::FrameSampling;
use crate::location::YtDlpResolver;
use crate::store::StoreSettings;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 使用 ffmpeg 抽帧、yt-dlp 下载的流水线
fn build_pipeline(opts: &Opts, settings: StoreSettings) -> anyhow::Result<Pipeline> {
    let frames = FfmpegFrameSource::new(FrameSampling::from(&opts.fingerprint));
    let resolver = YtDlpResolver::new(&opts.download_dir);
    Ok(PipelineBuilder::new(frames, resolver).store_settings(settings).build()?)
}
