use polars::prelude::DataFrame;
use tracing::warn;

use crate::area::AreaCode;
use crate::error::Result;
use crate::frame::{frame_to_normalized, frame_to_rows, read_parquet, ArchiveRow};
use crate::normalization::NormalizedRow;
use crate::stage::{has_stage, Stage};
use crate::storage::{ArchiveKey, DataLayout};

/// Loads the table for (`area`, `year`) at `stage`.
///
/// Returns `None` when the file is absent or has not been marked with `stage`.
pub fn load_stage(layout: &DataLayout, area: AreaCode, year: i32, stage: Stage) -> Result<Option<DataFrame>> {
    let path = layout.archive_path(stage, ArchiveKey::new(area, year));
    if !path.exists() {
        return Ok(None);
    }
    if !has_stage(&path, stage) {
        warn!(path = %path.display(), %stage, "file present but not marked with stage");
        return Ok(None);
    }
    Ok(Some(read_parquet(&path)?))
}

/// Preprocessed or cleaned rows for (`area`, `year`).
pub fn load_archive_rows(
    layout: &DataLayout,
    area: AreaCode,
    year: i32,
    stage: Stage,
) -> Result<Option<Vec<ArchiveRow>>> {
    match load_stage(layout, area, year, stage)? {
        Some(df) => Ok(Some(frame_to_rows(&df)?)),
        None => Ok(None),
    }
}

pub fn load_normalized_rows(layout: &DataLayout, area: AreaCode, year: i32) -> Result<Option<Vec<NormalizedRow>>> {
    match load_stage(layout, area, year, Stage::Normalized)? {
        Some(df) => Ok(Some(frame_to_normalized(&df)?)),
        None => Ok(None),
    }
}
