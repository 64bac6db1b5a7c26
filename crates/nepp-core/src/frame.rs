use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nepp_parser::{parse_instant, PriceRecord};
use polars::prelude::*;
use thiserror::Error;

use crate::normalization::NormalizedRow;
use crate::storage::write_atomic;

pub const PERIOD_START: &str = "period_start";
pub const PERIOD_END: &str = "period_end";
pub const PRICE: &str = "price";

pub const ARCHIVE_COLUMNS: [&str; 7] = [
    PRICE,
    "business_type",
    "in_domain",
    "out_domain",
    "currency",
    PERIOD_START,
    PERIOD_END,
];

/// Model-facing column order of a normalized table.
pub const NORMALIZED_COLUMNS: [&str; 8] = [
    PRICE,
    "hour_sin",
    "hour_cos",
    "day_of_week_sin",
    "day_of_week_cos",
    "day_of_month",
    "month",
    "year",
];

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Polars operation failed: {0}")]
    Polars(#[from] PolarsError),

    #[error("missing column '{column}'")]
    MissingColumn { column: &'static str },

    #[error("column '{column}' has unsupported type {dtype}")]
    ColumnType { column: &'static str, dtype: String },

    #[error("column '{column}' row {row}: invalid timestamp")]
    InvalidTimestamp { column: &'static str, row: usize },

    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One row of a preprocessed or cleaned archive.
///
/// `price` is optional because gap filling inserts hours without an observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRow {
    pub price: Option<f64>,
    pub business_type: String,
    pub in_domain: String,
    pub out_domain: String,
    pub currency: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl From<PriceRecord> for ArchiveRow {
    fn from(record: PriceRecord) -> Self {
        Self {
            price: Some(record.price),
            business_type: record.business_type,
            in_domain: record.in_domain,
            out_domain: record.out_domain,
            currency: record.currency,
            period_start: record.period_start,
            period_end: record.period_end,
        }
    }
}

impl ArchiveRow {
    /// The observation behind this row, if it has a price.
    pub fn to_record(&self) -> Option<PriceRecord> {
        self.price.map(|price| {
            PriceRecord::new(
                price,
                self.business_type.clone(),
                self.in_domain.clone(),
                self.out_domain.clone(),
                self.currency.clone(),
                self.period_start,
            )
        })
    }
}

fn utc_datetime_type() -> DataType {
    DataType::Datetime(TimeUnit::Microseconds, Some(polars::prelude::TimeZone::UTC))
}

fn timestamp_series(name: &str, values: Vec<i64>) -> Result<Series, FrameError> {
    Ok(Series::new(name.into(), values).cast(&utc_datetime_type())?)
}

pub fn rows_to_frame(rows: &[ArchiveRow]) -> Result<DataFrame, FrameError> {
    let prices: Vec<Option<f64>> = rows.iter().map(|row| row.price).collect();
    let text = |select: fn(&ArchiveRow) -> &str| -> Vec<String> {
        rows.iter().map(|row| select(row).to_string()).collect()
    };
    let starts: Vec<i64> = rows.iter().map(|row| row.period_start.timestamp_micros()).collect();
    let ends: Vec<i64> = rows.iter().map(|row| row.period_end.timestamp_micros()).collect();

    let df = DataFrame::new(vec![
        Series::new(PRICE.into(), prices).into(),
        Series::new("business_type".into(), text(|row| row.business_type.as_str())).into(),
        Series::new("in_domain".into(), text(|row| row.in_domain.as_str())).into(),
        Series::new("out_domain".into(), text(|row| row.out_domain.as_str())).into(),
        Series::new("currency".into(), text(|row| row.currency.as_str())).into(),
        timestamp_series(PERIOD_START, starts)?.into(),
        timestamp_series(PERIOD_END, ends)?.into(),
    ])?;
    Ok(df)
}

fn column<'a>(df: &'a DataFrame, name: &'static str) -> Result<&'a Column, FrameError> {
    df.column(name)
        .map_err(|_| FrameError::MissingColumn { column: name })
}

fn datetime_from_physical(value: i64, unit: TimeUnit) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
    }
}

/// Reads a timestamp column stored either as a datetime or as text into UTC instants.
fn timestamps(df: &DataFrame, name: &'static str) -> Result<Vec<Option<DateTime<Utc>>>, FrameError> {
    let col = column(df, name)?;
    match col.dtype() {
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            let values = col.datetime()?;
            Ok((0..df.height())
                .map(|idx| values.get(idx).and_then(|v| datetime_from_physical(v, unit)))
                .collect())
        }
        DataType::String => {
            let values = col.str()?;
            Ok((0..df.height())
                .map(|idx| values.get(idx).and_then(|v| parse_instant(v).ok()))
                .collect())
        }
        other => Err(FrameError::ColumnType {
            column: name,
            dtype: other.to_string(),
        }),
    }
}

fn text_column(df: &DataFrame, name: &'static str) -> Result<Vec<String>, FrameError> {
    let col = column(df, name)?.cast(&DataType::String)?;
    let values = col.str()?;
    Ok((0..df.height())
        .map(|idx| values.get(idx).unwrap_or_default().to_string())
        .collect())
}

/// Converts an archive table back into rows.
///
/// Prices are coerced to `f64` (unparseable values become missing), timestamps are coerced
/// to UTC instants, and a missing or invalid `period_end` is rebuilt from `period_start`.
pub fn frame_to_rows(df: &DataFrame) -> Result<Vec<ArchiveRow>, FrameError> {
    let price_col = column(df, PRICE)?.cast(&DataType::Float64)?;
    let prices = price_col.f64()?;
    let business_types = text_column(df, "business_type")?;
    let in_domains = text_column(df, "in_domain")?;
    let out_domains = text_column(df, "out_domain")?;
    let currencies = text_column(df, "currency")?;
    let starts = timestamps(df, PERIOD_START)?;
    let ends = if df.get_column_names().iter().any(|name| name.as_str() == PERIOD_END) {
        timestamps(df, PERIOD_END)?
    } else {
        vec![None; df.height()]
    };

    let mut rows = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let period_start = starts[idx].ok_or(FrameError::InvalidTimestamp {
            column: PERIOD_START,
            row: idx,
        })?;
        rows.push(ArchiveRow {
            price: prices.get(idx).filter(|price| !price.is_nan()),
            business_type: business_types[idx].clone(),
            in_domain: in_domains[idx].clone(),
            out_domain: out_domains[idx].clone(),
            currency: currencies[idx].clone(),
            period_start,
            period_end: ends[idx].unwrap_or(period_start + chrono::Duration::hours(1)),
        });
    }
    Ok(rows)
}

pub fn normalized_to_frame(rows: &[NormalizedRow]) -> Result<DataFrame, FrameError> {
    let float = |select: fn(&NormalizedRow) -> f64| -> Vec<f64> { rows.iter().map(select).collect() };
    let int = |select: fn(&NormalizedRow) -> i32| -> Vec<i32> { rows.iter().map(select).collect() };

    let df = DataFrame::new(vec![
        Series::new(PRICE.into(), rows.iter().map(|row| row.price).collect::<Vec<_>>()).into(),
        Series::new("hour_sin".into(), float(|row| row.hour_sin)).into(),
        Series::new("hour_cos".into(), float(|row| row.hour_cos)).into(),
        Series::new("day_of_week_sin".into(), float(|row| row.day_of_week_sin)).into(),
        Series::new("day_of_week_cos".into(), float(|row| row.day_of_week_cos)).into(),
        Series::new("day_of_month".into(), int(|row| row.day_of_month)).into(),
        Series::new("month".into(), int(|row| row.month)).into(),
        Series::new("year".into(), int(|row| row.year)).into(),
    ])?;
    Ok(df)
}

pub fn frame_to_normalized(df: &DataFrame) -> Result<Vec<NormalizedRow>, FrameError> {
    let mut floats = Vec::with_capacity(5);
    for name in &NORMALIZED_COLUMNS[..5] {
        floats.push(column(df, *name)?.cast(&DataType::Float64)?);
    }
    let mut ints = Vec::with_capacity(3);
    for name in &NORMALIZED_COLUMNS[5..] {
        ints.push(column(df, *name)?.cast(&DataType::Int32)?);
    }
    let price = floats[0].f64()?;
    let hour_sin = floats[1].f64()?;
    let hour_cos = floats[2].f64()?;
    let dow_sin = floats[3].f64()?;
    let dow_cos = floats[4].f64()?;
    let day_of_month = ints[0].i32()?;
    let month = ints[1].i32()?;
    let year = ints[2].i32()?;

    Ok((0..df.height())
        .map(|idx| NormalizedRow {
            price: price.get(idx).filter(|value| !value.is_nan()),
            hour_sin: hour_sin.get(idx).unwrap_or_default(),
            hour_cos: hour_cos.get(idx).unwrap_or_default(),
            day_of_week_sin: dow_sin.get(idx).unwrap_or_default(),
            day_of_week_cos: dow_cos.get(idx).unwrap_or_default(),
            day_of_month: day_of_month.get(idx).unwrap_or_default(),
            month: month.get(idx).unwrap_or_default(),
            year: year.get(idx).unwrap_or_default(),
        })
        .collect())
}

/// Serializes `df` to parquet and atomically replaces `path`.
pub fn write_parquet(path: &Path, df: &mut DataFrame) -> Result<(), FrameError> {
    let mut buffer = Vec::new();
    ParquetWriter::new(&mut buffer).finish(df)?;
    write_atomic(path, &buffer).map_err(|source| FrameError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_parquet(path: &Path) -> Result<DataFrame, FrameError> {
    let bytes = std::fs::read(path).map_err(|source| FrameError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(ParquetReader::new(Cursor::new(bytes)).finish()?)
}

pub fn read_rows(path: &Path) -> Result<Vec<ArchiveRow>, FrameError> {
    frame_to_rows(&read_parquet(path)?)
}

pub fn write_rows(path: &Path, rows: &[ArchiveRow]) -> Result<(), FrameError> {
    let mut df = rows_to_frame(rows)?;
    write_parquet(path, &mut df)
}
