pub mod config;
pub mod error;
pub mod fetcher;
pub mod types;

pub use config::{ConcurrencyConfig, PipelineConfig, RetryConfig, StageWorkerUrls};
pub use error::{PipelineError, Result};
pub use fetcher::{
    filename_stem_upper, parse_gcs_uri, InlineFetcher, LocalFileFetcher, SourceBlob, SourceFetcher,
};
pub use types::*;
