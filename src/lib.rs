pub mod batch;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod feature;
pub mod ffmpeg;
pub mod frame;
pub mod location;
pub mod normalize;
pub mod report;
pub mod source;
pub mod store;
pub mod utils;

pub use batch::{BatchReport, BatchStatistics, CancelToken, Pipeline, PipelineBuilder, WorkItem};
pub use cluster::{DuplicateGroup, SimilarityEdge};
pub use config::Opts;
pub use error::{Error, ErrorKind, Result};
pub use store::{SimilarityStore, StoreSettings};
