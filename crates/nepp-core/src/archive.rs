use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Datelike, Utc};
use nepp_parser::PriceRecord;
use tracing::{info, warn};

use crate::area::AreaCode;
use crate::error::Result;
use crate::frame::{read_rows, write_rows, ArchiveRow};
use crate::stage::{record_stage, Stage};
use crate::storage::{ArchiveKey, DataLayout};

/// Result of folding one batch into a (zone, year) archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub key: ArchiveKey,
    pub path: PathBuf,
    pub previous_rows: usize,
    pub incoming_rows: usize,
    pub merged_rows: usize,
    /// Timestamps already in the archive that the batch overwrote.
    pub replaced: usize,
}

/// Merges `incoming` into `existing` for one UTC year.
///
/// Only incoming records starting in `year` take part. On equal `period_start` an incoming
/// record replaces the archived one, a later incoming record replaces an earlier one, and
/// duplicates already inside `existing` keep the first seen. The result is sorted ascending.
pub fn merge(existing: &[PriceRecord], incoming: &[PriceRecord], year: i32) -> Vec<PriceRecord> {
    merge_counted(existing, incoming, year).0
}

fn merge_counted(
    existing: &[PriceRecord],
    incoming: &[PriceRecord],
    year: i32,
) -> (Vec<PriceRecord>, usize, usize) {
    let mut merged: BTreeMap<DateTime<Utc>, PriceRecord> = BTreeMap::new();
    for record in existing {
        merged
            .entry(record.period_start)
            .or_insert_with(|| record.clone());
    }
    let archived: BTreeSet<DateTime<Utc>> = merged.keys().copied().collect();

    let mut participating = 0usize;
    let mut replaced = BTreeSet::new();
    for record in incoming.iter().filter(|record| record.period_start.year() == year) {
        participating += 1;
        if archived.contains(&record.period_start) {
            replaced.insert(record.period_start);
        }
        merged.insert(record.period_start, record.clone());
    }

    (merged.into_values().collect(), participating, replaced.len())
}

/// Groups records by the UTC year of their `period_start`.
pub fn partition_by_year(records: &[PriceRecord]) -> BTreeMap<i32, Vec<PriceRecord>> {
    let mut years: BTreeMap<i32, Vec<PriceRecord>> = BTreeMap::new();
    for record in records {
        years
            .entry(record.period_start.year())
            .or_default()
            .push(record.clone());
    }
    years
}

/// Merges `incoming` into the preprocessed archive for (`area`, `year`) and marks it
/// `preprocessed`. The archive is only replaced once the merged table is fully written.
pub fn merge_into_archive(
    layout: &DataLayout,
    area: AreaCode,
    year: i32,
    incoming: &[PriceRecord],
) -> Result<MergeOutcome> {
    let key = ArchiveKey::new(area, year);
    let path = layout.archive_path(Stage::Preprocessed, key);

    let existing: Vec<PriceRecord> = if path.exists() {
        let rows = read_rows(&path)?;
        let total = rows.len();
        let records: Vec<PriceRecord> = rows.iter().filter_map(ArchiveRow::to_record).collect();
        if records.len() < total {
            warn!(
                path = %path.display(),
                dropped = total - records.len(),
                "ignoring archived rows without a price"
            );
        }
        records
    } else {
        Vec::new()
    };

    let (merged, participating, replaced) = merge_counted(&existing, incoming, year);
    let rows: Vec<ArchiveRow> = merged.into_iter().map(ArchiveRow::from).collect();
    write_rows(&path, &rows)?;
    record_stage(&path, Stage::Preprocessed)?;

    info!(
        %area,
        year,
        previous = existing.len(),
        incoming = participating,
        merged = rows.len(),
        replaced,
        "merged archive"
    );

    Ok(MergeOutcome {
        key,
        path,
        previous_rows: existing.len(),
        incoming_rows: participating,
        merged_rows: rows.len(),
        replaced,
    })
}
