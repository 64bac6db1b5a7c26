use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use blake3::Hasher;
use nepp_parser::{parse_document, DateRange, ParseError, PriceRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::{merge_into_archive, partition_by_year};
use crate::area::AreaCode;
use crate::error::{PipelineError, Result};
use crate::report::{FileReport, FileStatus, StageSummary};
use crate::storage::{write_atomic, DataLayout, RawFileName};

/// Which raw documents of an area a preprocessing run looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RawSelection {
    #[default]
    All,
    First(usize),
    Last(usize),
}

#[derive(Debug, Clone, Default)]
pub struct PreprocessOptions {
    /// Keep only records starting inside this range.
    pub range: Option<DateRange>,
    pub selection: RawSelection,
    /// Keep only raw files whose covered days touch these years (inclusive).
    pub years: Option<(i32, i32)>,
    /// Re-merge documents already recorded in the ingestion ledger.
    pub force: bool,
}

/// Content hashes of raw documents already merged for one area.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IngestionLedger {
    #[serde(skip)]
    path: PathBuf,
    hashes: BTreeSet<String>,
}

impl IngestionLedger {
    pub fn load(path: &Path) -> Result<Self> {
        let mut ledger = match fs::read(path) {
            Ok(bytes) => serde_json::from_slice::<IngestionLedger>(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => IngestionLedger::default(),
            Err(err) => return Err(PipelineError::io(path, err)),
        };
        ledger.path = path.to_path_buf();
        Ok(ledger)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.contains(hash)
    }

    pub fn insert(&mut self, hash: String) -> bool {
        self.hashes.insert(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(&self.path, &bytes).map_err(|err| PipelineError::io(&self.path, err))
    }
}

pub fn compute_hash(contents: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(contents);
    hasher.finalize().to_hex().to_string()
}

/// Applies the year filter, then the first/last selection, to name-sorted raw files.
pub fn select_raw_files(files: Vec<PathBuf>, options: &PreprocessOptions) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match options.years {
        Some((first, last)) => files
            .into_iter()
            .filter(|path| {
                RawFileName::from_path(path).is_some_and(|name| name.overlaps_years(first, last))
            })
            .collect(),
        None => files,
    };
    match options.selection {
        RawSelection::All => files,
        RawSelection::First(count) => {
            files.truncate(count);
            files
        }
        RawSelection::Last(count) => {
            let skip = files.len().saturating_sub(count);
            files.split_off(skip)
        }
    }
}

/// Parses the selected raw documents of `area` and merges them into the per-year archives.
///
/// A document that fails to read, parse or merge is reported and the batch continues.
/// Having no raw documents at all is an error.
pub fn preprocess_area(
    layout: &DataLayout,
    area: AreaCode,
    options: &PreprocessOptions,
) -> Result<StageSummary> {
    let all_files = layout.list_raw_files(area)?;
    if all_files.is_empty() {
        return Err(PipelineError::NoInput {
            area,
            location: layout.raw_area_dir(area),
        });
    }
    let files = select_raw_files(all_files, options);
    info!(%area, files = files.len(), "preprocessing raw documents");

    let mut ledger = IngestionLedger::load(&layout.ledger_path(area))?;
    let mut summary = StageSummary::new("preprocess", area);

    for path in files {
        let report = preprocess_file(layout, area, &path, options, &mut ledger);
        match report.status {
            FileStatus::Failed | FileStatus::Skipped => warn!(
                path = %path.display(),
                status = %report.status,
                reason = report.message.as_deref().unwrap_or_default(),
                "raw document not merged"
            ),
            _ => info!(path = %path.display(), status = %report.status, rows = report.rows, "raw document"),
        }
        summary.push(report);
    }

    Ok(summary)
}

fn preprocess_file(
    layout: &DataLayout,
    area: AreaCode,
    path: &Path,
    options: &PreprocessOptions,
    ledger: &mut IngestionLedger,
) -> FileReport {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => return FileReport::with_status(path, FileStatus::Failed, err.to_string()),
    };

    let hash = compute_hash(&bytes);
    if ledger.contains(&hash) && !options.force {
        return FileReport::with_status(path, FileStatus::Duplicate, "already merged");
    }

    let parsed = match parse_document(&bytes, options.range.as_ref()) {
        Ok(parsed) => parsed,
        Err(ParseError::Acknowledgement { reason }) => {
            return FileReport::with_status(path, FileStatus::Skipped, format!("no data: {reason}"));
        }
        Err(err) => return FileReport::with_status(path, FileStatus::Failed, err.to_string()),
    };

    for skipped in &parsed.skipped {
        warn!(
            path = %path.display(),
            series = skipped.series_index,
            period = ?skipped.period_index,
            reason = %skipped.reason,
            "time series skipped"
        );
    }

    let total = parsed.records.len();
    let records: Vec<PriceRecord> = parsed
        .records
        .into_iter()
        .filter(|record| record.in_domain == area.eic())
        .collect();
    if records.len() < total {
        warn!(
            path = %path.display(),
            %area,
            dropped = total - records.len(),
            "dropping records for another zone"
        );
    }

    let mut merged_rows = 0usize;
    for (year, batch) in partition_by_year(&records) {
        match merge_into_archive(layout, area, year, &batch) {
            Ok(outcome) => merged_rows += outcome.incoming_rows,
            Err(err) => {
                return FileReport::with_status(
                    path,
                    FileStatus::Failed,
                    format!("merge into {year} archive failed: {err}"),
                )
            }
        }
    }

    // Points dropped by the range filter are still unmerged; keep the document eligible.
    if parsed.out_of_range == 0 {
        ledger.insert(hash);
        if let Err(err) = ledger.save() {
            warn!(path = %path.display(), error = %err, "failed to update ingestion ledger");
        }
    } else {
        debug!(
            path = %path.display(),
            out_of_range = parsed.out_of_range,
            "document partially merged; not recorded in ingestion ledger"
        );
    }

    let mut report = FileReport::processed(path, merged_rows);
    if !parsed.skipped.is_empty() || parsed.out_of_range > 0 {
        report.message = Some(format!(
            "{} series skipped, {} points outside range",
            parsed.skipped.len(),
            parsed.out_of_range
        ));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    fn raw_files() -> Vec<PathBuf> {
        [
            "NO1_20221201_to_20221231_prices.xml",
            "NO1_20230101_to_20231231_prices.xml",
            "NO1_20231215_to_20240115_prices.xml",
            "NO1_20240116_to_20240301_prices.xml",
        ]
        .iter()
        .map(PathBuf::from)
        .collect()
    }

    #[test]
    fn selects_first_and_last() {
        let first = PreprocessOptions {
            selection: RawSelection::First(2),
            ..Default::default()
        };
        assert_eq!(
            names(&select_raw_files(raw_files(), &first)),
            vec![
                "NO1_20221201_to_20221231_prices.xml",
                "NO1_20230101_to_20231231_prices.xml"
            ]
        );

        let last = PreprocessOptions {
            selection: RawSelection::Last(1),
            ..Default::default()
        };
        assert_eq!(
            names(&select_raw_files(raw_files(), &last)),
            vec!["NO1_20240116_to_20240301_prices.xml"]
        );

        let too_many = PreprocessOptions {
            selection: RawSelection::Last(10),
            ..Default::default()
        };
        assert_eq!(select_raw_files(raw_files(), &too_many).len(), 4);
    }

    #[test]
    fn year_filter_keeps_overlapping_files() {
        let options = PreprocessOptions {
            years: Some((2024, 2024)),
            ..Default::default()
        };
        assert_eq!(
            names(&select_raw_files(raw_files(), &options)),
            vec![
                "NO1_20231215_to_20240115_prices.xml",
                "NO1_20240116_to_20240301_prices.xml"
            ]
        );
    }

    #[test]
    fn ledger_survives_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".ingested.json");

        let mut ledger = IngestionLedger::load(&path).expect("load missing");
        assert!(ledger.is_empty());
        assert!(ledger.insert(compute_hash(b"a")));
        assert!(!ledger.insert(compute_hash(b"a")));
        ledger.save().expect("save");

        let reloaded = IngestionLedger::load(&path).expect("reload");
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains(&compute_hash(b"a")));
    }

    #[test]
    fn hash_is_stable_hex() {
        let hash = compute_hash(b"<doc/>");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_hash(b"<doc/>"));
        assert_ne!(hash, compute_hash(b"<doc />"));
    }
}
