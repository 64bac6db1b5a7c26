//! Per-file stage tracking.
//!
//! Every archive carries a sidecar `<file>.stages` whose first line lists, comma separated
//! and in the order they were applied, the pipeline stages the file has passed through.
//! An absent sidecar means no stages.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::write_atomic;

const SIDECAR_EXTENSION: &str = "stages";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Preprocessed,
    Cleaned,
    Normalized,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Preprocessed, Stage::Cleaned, Stage::Normalized];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preprocessed => "preprocessed",
            Stage::Cleaned => "cleaned",
            Stage::Normalized => "normalized",
        }
    }

    /// The stage an input must carry before this stage may consume it.
    pub fn prerequisite(&self) -> Option<Stage> {
        match self {
            Stage::Preprocessed => None,
            Stage::Cleaned => Some(Stage::Preprocessed),
            Stage::Normalized => Some(Stage::Cleaned),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = StageMetadataError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "preprocessed" => Ok(Stage::Preprocessed),
            "cleaned" => Ok(Stage::Cleaned),
            "normalized" => Ok(Stage::Normalized),
            _ => Err(StageMetadataError::UnknownStage {
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum StageMetadataError {
    #[error("failed to read stage metadata {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write stage metadata {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unknown stage '{value}'")]
    UnknownStage { value: String },

    #[error("{} cannot be marked '{stage}' without '{required}'", .path.display())]
    MissingPrerequisite {
        path: PathBuf,
        stage: Stage,
        required: Stage,
    },
}

/// Ordered, duplicate-free list of stages applied to one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSet(Vec<Stage>);

impl StageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_line(line: &str) -> Result<Self, StageMetadataError> {
        let mut set = Self::new();
        for token in line.split(',').map(str::trim).filter(|token| !token.is_empty()) {
            set.insert(token.parse()?);
        }
        Ok(set)
    }

    pub fn to_line(&self) -> String {
        self.0
            .iter()
            .map(Stage::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.0.contains(&stage)
    }

    /// Appends `stage` if absent. Returns whether the set changed.
    pub fn insert(&mut self, stage: Stage) -> bool {
        if self.contains(stage) {
            return false;
        }
        self.0.push(stage);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = Stage> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

pub fn sidecar_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}

/// Reads the stages recorded for `file`; a missing sidecar yields an empty set.
pub fn read_stages(file: &Path) -> Result<StageSet, StageMetadataError> {
    let path = sidecar_path(file);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(StageSet::new()),
        Err(source) => return Err(StageMetadataError::Read { path, source }),
    };
    StageSet::parse_line(contents.lines().next().unwrap_or_default())
}

fn write_stages(file: &Path, stages: &StageSet) -> Result<(), StageMetadataError> {
    let path = sidecar_path(file);
    let line = format!("{}\n", stages.to_line());
    write_atomic(&path, line.as_bytes()).map_err(|source| StageMetadataError::Write { path, source })
}

fn require_prerequisite(stages: &StageSet, file: &Path, stage: Stage) -> Result<(), StageMetadataError> {
    match stage.prerequisite() {
        Some(required) if !stages.contains(required) => Err(StageMetadataError::MissingPrerequisite {
            path: file.to_path_buf(),
            stage,
            required,
        }),
        _ => Ok(()),
    }
}

/// Adds `stage` to the metadata of `file`. Returns `true` when the sidecar was rewritten.
///
/// Fails without writing when `file` lacks the prerequisite of `stage`.
pub fn record_stage(file: &Path, stage: Stage) -> Result<bool, StageMetadataError> {
    let mut stages = read_stages(file)?;
    require_prerequisite(&stages, file, stage)?;
    if !stages.insert(stage) {
        debug!(path = %file.display(), %stage, "stage already recorded");
        return Ok(false);
    }
    write_stages(file, &stages).inspect_err(|err| {
        warn!(path = %file.display(), %stage, error = %err, "failed to record stage");
    })?;
    Ok(true)
}

/// Whether `stage` has been applied to `file`. Unreadable metadata counts as absent.
pub fn has_stage(file: &Path, stage: Stage) -> bool {
    match read_stages(file) {
        Ok(stages) => stages.contains(stage),
        Err(err) => {
            warn!(path = %file.display(), %stage, error = %err, "treating stage as absent");
            false
        }
    }
}

/// Writes `source`'s stages plus `stage` as the metadata of `target`.
///
/// Fails when `source` lacks the prerequisite of `stage`.
pub fn inherit_stages(source: &Path, target: &Path, stage: Stage) -> Result<StageSet, StageMetadataError> {
    let mut stages = read_stages(source)?;
    require_prerequisite(&stages, source, stage)?;
    stages.insert(stage);
    write_stages(target, &stages)?;
    Ok(stages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_keeps_order_and_drops_repeats() {
        let set = StageSet::parse_line("preprocessed, cleaned,preprocessed,").expect("parse");
        assert_eq!(set.to_line(), "preprocessed,cleaned");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn parse_line_rejects_unknown_stage() {
        assert!(matches!(
            StageSet::parse_line("preprocessed,smoothed"),
            Err(StageMetadataError::UnknownStage { .. })
        ));
    }

    #[test]
    fn empty_line_is_empty_set() {
        assert!(StageSet::parse_line("").expect("parse").is_empty());
    }

    #[test]
    fn sidecar_sits_next_to_file() {
        assert_eq!(
            sidecar_path(Path::new("/data/processed/cleaned/NO1/NO1_2023.parquet")),
            PathBuf::from("/data/processed/cleaned/NO1/NO1_2023.parquet.stages")
        );
    }
}
