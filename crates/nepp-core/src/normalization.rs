use std::f64::consts::PI;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::area::AreaCode;
use crate::cleaning::is_up_to_date;
use crate::error::{PipelineError, Result};
use crate::frame::{normalized_to_frame, read_rows, write_parquet, ArchiveRow};
use crate::report::{FileReport, FileStatus, StageSummary};
use crate::stage::{has_stage, inherit_stages, Stage};
use crate::storage::{write_atomic, DataLayout};

const HOURS_PER_DAY: f64 = 24.0;
const DAYS_PER_WEEK: f64 = 7.0;

/// Calendar fields of an hour start, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFeatures {
    pub hour: u32,
    /// Monday = 0.
    pub day_of_week: u32,
    pub day_of_month: u32,
    pub month: u32,
    pub year: i32,
}

impl CalendarFeatures {
    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        Self {
            hour: instant.hour(),
            day_of_week: instant.weekday().num_days_from_monday(),
            day_of_month: instant.day(),
            month: instant.month(),
            year: instant.year(),
        }
    }
}

/// Encodes `value` on a circle of length `period` as `(sin, cos)`.
pub fn cyclical(value: f64, period: f64) -> (f64, f64) {
    let angle = 2.0 * PI * (value / period);
    (angle.sin(), angle.cos())
}

/// Min-max scaler mapping the fitted range onto `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: f64,
    pub max: f64,
}

impl MinMaxScaler {
    /// Fits on the present, finite values. Returns `None` when there are none.
    pub fn fit<I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        values
            .into_iter()
            .flatten()
            .filter(|value| value.is_finite())
            .fold(None, |acc: Option<Self>, value| {
                Some(match acc {
                    Some(scaler) => Self {
                        min: scaler.min.min(value),
                        max: scaler.max.max(value),
                    },
                    None => Self { min: value, max: value },
                })
            })
    }

    /// A constant fitted range maps everything to 0.0.
    pub fn transform(&self, value: f64) -> f64 {
        let range = self.max - self.min;
        if range == 0.0 {
            0.0
        } else {
            (value - self.min) / range
        }
    }

    pub fn inverse(&self, scaled: f64) -> f64 {
        scaled * (self.max - self.min) + self.min
    }
}

/// One model-ready hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub price: Option<f64>,
    pub hour_sin: f64,
    pub hour_cos: f64,
    pub day_of_week_sin: f64,
    pub day_of_week_cos: f64,
    pub day_of_month: i32,
    pub month: i32,
    pub year: i32,
}

impl NormalizedRow {
    /// Values in model column order; `None` when the price is missing.
    pub fn features(&self) -> Option<[f64; 8]> {
        let price = self.price?;
        Some([
            price,
            self.hour_sin,
            self.hour_cos,
            self.day_of_week_sin,
            self.day_of_week_cos,
            f64::from(self.day_of_month),
            f64::from(self.month),
            f64::from(self.year),
        ])
    }
}

/// Derives calendar features and scales prices with a scaler fit on `rows` alone.
pub fn normalize_rows(rows: &[ArchiveRow]) -> (Vec<NormalizedRow>, Option<MinMaxScaler>) {
    let scaler = MinMaxScaler::fit(rows.iter().map(|row| row.price));
    let normalized = rows
        .iter()
        .map(|row| {
            let calendar = CalendarFeatures::from_instant(row.period_start);
            let (hour_sin, hour_cos) = cyclical(f64::from(calendar.hour), HOURS_PER_DAY);
            let (day_of_week_sin, day_of_week_cos) =
                cyclical(f64::from(calendar.day_of_week), DAYS_PER_WEEK);
            NormalizedRow {
                price: row
                    .price
                    .zip(scaler)
                    .map(|(price, scaler)| scaler.transform(price)),
                hour_sin,
                hour_cos,
                day_of_week_sin,
                day_of_week_cos,
                day_of_month: calendar.day_of_month as i32,
                month: calendar.month as i32,
                year: calendar.year,
            }
        })
        .collect();
    (normalized, scaler)
}

pub fn scaler_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".scaler.json");
    PathBuf::from(name)
}

pub fn save_scaler(file: &Path, scaler: &MinMaxScaler) -> Result<()> {
    let path = scaler_path(file);
    let bytes = serde_json::to_vec_pretty(scaler)?;
    write_atomic(&path, &bytes).map_err(|err| PipelineError::io(path, err))
}

/// The scaler fitted for a normalized file, if one was saved.
pub fn load_scaler(file: &Path) -> Result<Option<MinMaxScaler>> {
    let path = scaler_path(file);
    match fs::read(&path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(PipelineError::io(path, err)),
    }
}

/// Normalizes every cleaned archive of `area`.
pub fn run_normalization(layout: &DataLayout, area: AreaCode, force: bool) -> Result<StageSummary> {
    let mut summary = StageSummary::new("normalize", area);

    for key in layout.list_archives(Stage::Cleaned, area)? {
        let source = layout.archive_path(Stage::Cleaned, key);
        let target = layout.archive_path(Stage::Normalized, key);

        if !has_stage(&source, Stage::Cleaned) {
            let err = PipelineError::MissingPrerequisiteStage {
                path: source.clone(),
                required: Stage::Cleaned,
            };
            warn!(%area, year = key.year, error = %err, "skipping archive");
            summary.push(FileReport::with_status(&source, FileStatus::Skipped, err.to_string()));
            continue;
        }

        if !force && has_stage(&target, Stage::Normalized) && is_up_to_date(&source, &target) {
            debug!(%area, year = key.year, "normalized archive is up to date");
            summary.push(FileReport::with_status(&target, FileStatus::UpToDate, "output newer than input"));
            continue;
        }

        match normalize_archive(&source, &target) {
            Ok(Some(rows)) => {
                info!(%area, year = key.year, rows, "normalized archive");
                summary.push(FileReport::processed(&target, rows));
            }
            Ok(None) => {
                warn!(%area, year = key.year, "no prices to scale");
                summary.push(FileReport::with_status(&source, FileStatus::Skipped, "no prices to scale"));
            }
            Err(err) => {
                warn!(%area, year = key.year, error = %err, "normalization failed");
                summary.push(FileReport::with_status(&source, FileStatus::Failed, err.to_string()));
            }
        }
    }

    Ok(summary)
}

fn normalize_archive(source: &Path, target: &Path) -> Result<Option<usize>> {
    let rows = read_rows(source)?;
    let (normalized, scaler) = normalize_rows(&rows);
    let Some(scaler) = scaler else {
        return Ok(None);
    };
    let mut df = normalized_to_frame(&normalized)?;
    write_parquet(target, &mut df)?;
    save_scaler(target, &scaler)?;
    inherit_stages(source, target, Stage::Normalized)?;
    Ok(Some(normalized.len()))
}
