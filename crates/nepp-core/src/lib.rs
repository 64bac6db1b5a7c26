pub mod archive;
pub mod area;
pub mod cleaning;
pub mod config;
#[cfg(feature = "runtime")]
pub mod entsoe;
pub mod error;
pub mod export;
pub mod fetch;
pub mod frame;
pub mod loader;
pub mod normalization;
pub mod pipeline;
pub mod preprocess;
pub mod report;
pub mod stage;
pub mod storage;
pub mod windowing;

pub use area::AreaCode;
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, RunSummary};
pub use report::{FileReport, FileStatus, StageSummary};
pub use stage::Stage;
