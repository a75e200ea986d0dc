use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{ArgGroup, Parser};
use indicatif::ProgressBar;
use log::{info, warn};
use tokio::task::spawn_blocking;

use super::build_pipeline;
use crate::batch::{CancelToken, default_workers};
use crate::cli::SubCommandExtend;
use crate::config::{Opts, StoreOptions};
use crate::report::{ReportFormat, render_report, write_json, write_report};
use crate::source::{DEFAULT_SUFFIX, read_csv, scan_directory};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
#[command(group(ArgGroup::new("source").required(true).args(["csv", "dir"])))]
pub struct BatchCommand {
    #[command(flatten)]
    pub store: StoreOptions,
    /// 包含视频 URL 或路径的 CSV 文件
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,
    /// CSV 中 URL 所在的列名，不指定时自动检测
    #[arg(long, value_name = "COLUMN", requires = "csv")]
    pub url_column: Option<String>,
    /// CSV 文件编码，例如 gbk，解码失败时会依次尝试 UTF-8 与 GBK
    #[arg(long, value_name = "ENCODING", requires = "csv")]
    pub encoding: Option<String>,
    /// 视频所在目录
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,
    /// 扫描目录时的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
    /// 并发处理的视频数量，默认为 CPU 核数减一
    #[arg(short = 'j', long, value_name = "N", env = "VIDSEARCH_WORKERS")]
    pub workers: Option<usize>,
    /// 文本报告输出路径
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
    /// JSON 结果输出路径
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,
    /// 报告格式，默认根据输入类型选择
    #[arg(long, value_enum)]
    pub report_format: Option<ReportFormat>,
}

impl SubCommandExtend for BatchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let items = match (&self.csv, &self.dir) {
            (Some(csv), _) => read_csv(csv, self.url_column.as_deref(), self.encoding.as_deref())?,
            (None, Some(dir)) => scan_directory(dir, &self.suffix)?,
            (None, None) => return Err(anyhow!("需要指定 --csv 或 --dir")),
        };
        if items.is_empty() {
            warn!("没有需要处理的视频");
            return Ok(());
        }

        let pipeline = Arc::new(build_pipeline(opts, self.store.settings(opts.fingerprint.dimension))?);
        let workers = self.workers.unwrap_or_else(default_workers);
        let pca_samples = opts.fingerprint.pca_samples;

        let cancel = CancelToken::new();
        let pb = ProgressBar::new(items.len() as u64).with_style(pb_style());

        let signal = tokio::spawn({
            let cancel = cancel.clone();
            let pb = pb.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    pb.println("收到中断信号，等待进行中的视频处理完成");
                    cancel.cancel();
                }
            }
        });

        let report = spawn_blocking({
            let pipeline = pipeline.clone();
            let pb = pb.clone();
            move || {
                pipeline.prepare_projection(&items, pca_samples)?;
                pipeline.run_batch_with(items, workers, &pb, &cancel)
            }
        })
        .await??;
        signal.abort();
        pb.finish_with_message("处理完成");

        let format = self.report_format.unwrap_or(if self.csv.is_some() {
            ReportFormat::Csv
        } else {
            ReportFormat::Generic
        });
        let formatter = format.formatter();
        println!("{}", render_report(&report, formatter.as_ref()));

        if let Some(path) = &self.report {
            write_report(&report, formatter.as_ref(), path)?;
        }
        if let Some(path) = &self.json {
            write_json(&report, path)?;
        }
        info!("向量库中共有 {} 个指纹", pipeline.store().len());

        Ok(())
    }
}
