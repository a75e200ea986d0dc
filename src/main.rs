use clap::Parser;
use log::debug;

use vidsearch::cli::SubCommandExtend;
use vidsearch::config::{Opts, SubCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();
    debug!("{:?}", opts);

    match &opts.subcmd {
        SubCommand::Batch(config) => config.run(&opts).await,
        SubCommand::Compare(config) => config.run(&opts).await,
        SubCommand::Fingerprint(config) => config.run(&opts).await,
    }
}
