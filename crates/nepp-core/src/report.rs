use std::fmt;
use std::path::PathBuf;

use crate::area::AreaCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Processed,
    /// Raw document already merged in an earlier run.
    Duplicate,
    /// Output newer than its input and already carrying the stage.
    UpToDate,
    Skipped,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Processed => "processed",
            FileStatus::Duplicate => "duplicate",
            FileStatus::UpToDate => "up-to-date",
            FileStatus::Skipped => "skipped",
            FileStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: FileStatus,
    pub rows: usize,
    pub message: Option<String>,
}

impl FileReport {
    pub fn processed(path: impl Into<PathBuf>, rows: usize) -> Self {
        Self {
            path: path.into(),
            status: FileStatus::Processed,
            rows,
            message: None,
        }
    }

    pub fn with_status(path: impl Into<PathBuf>, status: FileStatus, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status,
            rows: 0,
            message: Some(message.into()),
        }
    }
}

/// Per-file outcome of one step for one area.
#[derive(Debug, Clone)]
pub struct StageSummary {
    pub step: &'static str,
    pub area: AreaCode,
    pub reports: Vec<FileReport>,
}

impl StageSummary {
    pub fn new(step: &'static str, area: AreaCode) -> Self {
        Self {
            step,
            area,
            reports: Vec::new(),
        }
    }

    pub fn push(&mut self, report: FileReport) {
        self.reports.push(report);
    }

    pub fn count(&self, status: FileStatus) -> usize {
        self.reports
            .iter()
            .filter(|report| report.status == status)
            .count()
    }

    pub fn processed(&self) -> usize {
        self.count(FileStatus::Processed)
    }

    /// Files not processed for a benign reason: duplicates, up-to-date outputs and skips.
    pub fn skipped(&self) -> usize {
        self.count(FileStatus::Duplicate) + self.count(FileStatus::UpToDate) + self.count(FileStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(FileStatus::Failed)
    }

    pub fn rows(&self) -> usize {
        self.reports.iter().map(|report| report.rows).sum()
    }
}
