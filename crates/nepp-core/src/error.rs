use std::path::PathBuf;

use thiserror::Error;

use crate::area::AreaCode;
use crate::fetch::FetchError;
use crate::frame::FrameError;
use crate::stage::{Stage, StageMetadataError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No raw input for {area} under {}", .location.display())]
    NoInput { area: AreaCode, location: PathBuf },

    #[error("{} has not passed the '{required}' stage", .path.display())]
    MissingPrerequisiteStage { path: PathBuf, required: Stage },

    #[error("File I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Stage(#[from] StageMetadataError),

    #[error("Document parse failed: {0}")]
    Parse(#[from] nepp_parser::ParseError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
