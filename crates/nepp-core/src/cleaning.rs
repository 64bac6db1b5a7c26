use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::area::AreaCode;
use crate::error::{PipelineError, Result};
use crate::frame::{read_rows, write_rows, ArchiveRow};
use crate::report::{FileReport, FileStatus, StageSummary};
use crate::stage::{has_stage, inherit_stages, Stage};
use crate::storage::DataLayout;

#[derive(Debug, Clone, Copy)]
pub struct CleaningOptions {
    /// Insert rows for hours missing between the first and last observation.
    pub fill_missing_hours: bool,
    /// Rebuild outputs that are already up to date.
    pub force: bool,
}

impl Default for CleaningOptions {
    fn default() -> Self {
        Self {
            fill_missing_hours: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleaningStats {
    pub input_rows: usize,
    pub duplicates_removed: usize,
    pub hours_inserted: usize,
    pub forward_filled: usize,
    /// Missing prices before the first observation; these stay missing.
    pub leading_missing: usize,
    pub output_rows: usize,
}

/// Cleans one archive's rows.
///
/// Rows are ordered by `period_start`; exact duplicate rows are dropped; when
/// `fill_missing_hours` is set, absent hours between the first and last row are inserted
/// with no price; missing prices are then forward filled.
pub fn clean_rows(rows: Vec<ArchiveRow>, fill_missing_hours: bool) -> (Vec<ArchiveRow>, CleaningStats) {
    let mut stats = CleaningStats {
        input_rows: rows.len(),
        ..Default::default()
    };

    let mut rows = rows;
    rows.sort_by_key(|row| row.period_start);

    let mut deduped: Vec<ArchiveRow> = Vec::with_capacity(rows.len());
    for row in rows {
        let duplicate = deduped
            .iter()
            .rev()
            .take_while(|kept| kept.period_start == row.period_start)
            .any(|kept| same_row(kept, &row));
        if duplicate {
            stats.duplicates_removed += 1;
        } else {
            deduped.push(row);
        }
    }

    let mut rows = if fill_missing_hours {
        let (filled, inserted) = insert_missing_hours(deduped);
        stats.hours_inserted = inserted;
        filled
    } else {
        deduped
    };

    let mut last_price: Option<f64> = None;
    for row in rows.iter_mut() {
        match (row.price, last_price) {
            (Some(price), _) => last_price = Some(price),
            (None, Some(previous)) => {
                row.price = Some(previous);
                stats.forward_filled += 1;
            }
            (None, None) => stats.leading_missing += 1,
        }
    }

    stats.output_rows = rows.len();
    (rows, stats)
}

fn same_row(a: &ArchiveRow, b: &ArchiveRow) -> bool {
    let same_price = match (a.price, b.price) {
        (Some(x), Some(y)) => x.to_bits() == y.to_bits(),
        (None, None) => true,
        _ => false,
    };
    same_price
        && a.period_start == b.period_start
        && a.period_end == b.period_end
        && a.business_type == b.business_type
        && a.in_domain == b.in_domain
        && a.out_domain == b.out_domain
        && a.currency == b.currency
}

/// Inserts price-less rows on the hourly grid anchored at the first row.
fn insert_missing_hours(rows: Vec<ArchiveRow>) -> (Vec<ArchiveRow>, usize) {
    if rows.is_empty() {
        return (rows, 0);
    }
    let first_start = rows[0].period_start;
    let last_start = rows[rows.len() - 1].period_start;
    let present: BTreeSet<DateTime<Utc>> = rows.iter().map(|row| row.period_start).collect();

    let mut output = Vec::with_capacity(rows.len());
    let mut inserted = 0usize;
    let mut cursor = first_start;
    let mut source = rows.into_iter().peekable();

    while cursor <= last_start {
        while let Some(row) = source.next_if(|row| row.period_start <= cursor) {
            output.push(row);
        }
        if !present.contains(&cursor) {
            if let Some(template) = output.last() {
                output.push(placeholder(template, cursor));
                inserted += 1;
            }
        }
        cursor += Duration::hours(1);
    }
    output.extend(source);

    (output, inserted)
}

fn placeholder(template: &ArchiveRow, period_start: DateTime<Utc>) -> ArchiveRow {
    ArchiveRow {
        price: None,
        business_type: template.business_type.clone(),
        in_domain: template.in_domain.clone(),
        out_domain: template.out_domain.clone(),
        currency: template.currency.clone(),
        period_start,
        period_end: period_start + Duration::hours(1),
    }
}

/// True when `output` exists and was written no earlier than `input`.
pub(crate) fn is_up_to_date(input: &Path, output: &Path) -> bool {
    let modified = |path: &Path| fs::metadata(path).and_then(|meta| meta.modified()).ok();
    match (modified(input), modified(output)) {
        (Some(input), Some(output)) => output >= input,
        _ => false,
    }
}

/// Cleans every preprocessed archive of `area` into the cleaned stage.
pub fn run_cleaning(layout: &DataLayout, area: AreaCode, options: CleaningOptions) -> Result<StageSummary> {
    let mut summary = StageSummary::new("clean", area);

    for key in layout.list_archives(Stage::Preprocessed, area)? {
        let source = layout.archive_path(Stage::Preprocessed, key);
        let target = layout.archive_path(Stage::Cleaned, key);

        if !has_stage(&source, Stage::Preprocessed) {
            let err = PipelineError::MissingPrerequisiteStage {
                path: source.clone(),
                required: Stage::Preprocessed,
            };
            warn!(%area, year = key.year, error = %err, "skipping archive");
            summary.push(FileReport::with_status(&source, FileStatus::Skipped, err.to_string()));
            continue;
        }

        if !options.force && has_stage(&target, Stage::Cleaned) && is_up_to_date(&source, &target) {
            debug!(%area, year = key.year, "cleaned archive is up to date");
            summary.push(FileReport::with_status(&target, FileStatus::UpToDate, "output newer than input"));
            continue;
        }

        match clean_archive(&source, &target, options.fill_missing_hours) {
            Ok(stats) => {
                info!(
                    %area,
                    year = key.year,
                    input = stats.input_rows,
                    duplicates = stats.duplicates_removed,
                    inserted = stats.hours_inserted,
                    filled = stats.forward_filled,
                    rows = stats.output_rows,
                    "cleaned archive"
                );
                summary.push(FileReport::processed(&target, stats.output_rows));
            }
            Err(err) => {
                warn!(%area, year = key.year, error = %err, "cleaning failed");
                summary.push(FileReport::with_status(&source, FileStatus::Failed, err.to_string()));
            }
        }
    }

    Ok(summary)
}

fn clean_archive(source: &Path, target: &Path, fill_missing_hours: bool) -> Result<CleaningStats> {
    let rows = read_rows(source)?;
    let (cleaned, stats) = clean_rows(rows, fill_missing_hours);
    write_rows(target, &cleaned)?;
    inherit_stages(source, target, Stage::Cleaned)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(hour: i64, price: Option<f64>) -> ArchiveRow {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap() + Duration::hours(hour);
        ArchiveRow {
            price,
            business_type: "A62".into(),
            in_domain: "10YNO-3--------J".into(),
            out_domain: "10YNO-3--------J".into(),
            currency: "EUR".into(),
            period_start: start,
            period_end: start + Duration::hours(1),
        }
    }

    #[test]
    fn drops_exact_duplicates_only() {
        let rows = vec![row(0, Some(1.0)), row(0, Some(1.0)), row(0, Some(2.0)), row(1, Some(3.0))];
        let (cleaned, stats) = clean_rows(rows, false);
        assert_eq!(stats.duplicates_removed, 1);
        assert_eq!(cleaned.len(), 3);
    }

    #[test]
    fn forward_fills_and_keeps_leading_gap() {
        let rows = vec![row(0, None), row(1, Some(5.0)), row(2, None), row(3, None), row(4, Some(7.0))];
        let (cleaned, stats) = clean_rows(rows, false);
        let prices: Vec<Option<f64>> = cleaned.iter().map(|row| row.price).collect();
        assert_eq!(prices, vec![None, Some(5.0), Some(5.0), Some(5.0), Some(7.0)]);
        assert_eq!(stats.forward_filled, 2);
        assert_eq!(stats.leading_missing, 1);
    }

    #[test]
    fn fills_missing_hours_from_previous_price() {
        let rows = vec![row(3, Some(30.0)), row(0, Some(10.0)), row(1, Some(20.0))];
        let (cleaned, stats) = clean_rows(rows, true);
        let hours: Vec<i64> = cleaned
            .iter()
            .map(|r| (r.period_start - row(0, None).period_start).num_hours())
            .collect();
        assert_eq!(hours, vec![0, 1, 2, 3]);
        assert_eq!(cleaned[2].price, Some(20.0));
        assert_eq!(cleaned[2].period_end - cleaned[2].period_start, Duration::hours(1));
        assert_eq!(stats.hours_inserted, 1);
        assert_eq!(stats.forward_filled, 1);
    }

    #[test]
    fn empty_input_stays_empty() {
        let (cleaned, stats) = clean_rows(Vec::new(), true);
        assert!(cleaned.is_empty());
        assert_eq!(stats, CleaningStats::default());
    }
}
