use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ParseError;

/// One hourly day-ahead price observation.
///
/// `period_end` is always `period_start + 1h`; the only constructor enforces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub price: f64,
    pub business_type: String,
    pub in_domain: String,
    pub out_domain: String,
    pub currency: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl PriceRecord {
    pub fn new(
        price: f64,
        business_type: impl Into<String>,
        in_domain: impl Into<String>,
        out_domain: impl Into<String>,
        currency: impl Into<String>,
        period_start: DateTime<Utc>,
    ) -> Self {
        Self {
            price,
            business_type: business_type.into(),
            in_domain: in_domain.into(),
            out_domain: out_domain.into(),
            currency: currency.into(),
            period_start,
            period_end: period_start + Duration::hours(1),
        }
    }
}

/// Inclusive UTC instant range used to keep only the points of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Builds a range from calendar dates; `end` is extended to the last second of that day.
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Self {
        let start = start.and_time(NaiveTime::MIN).and_utc();
        let end = end
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc())
            .unwrap_or(start);
        Self { start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingBusinessType,
    MissingInDomain,
    MissingOutDomain,
    MissingCurrency,
    UnsupportedResolution,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingBusinessType => "missing businessType",
            SkipReason::MissingInDomain => "missing in_Domain.mRID",
            SkipReason::MissingOutDomain => "missing out_Domain.mRID",
            SkipReason::MissingCurrency => "missing currency_Unit.name",
            SkipReason::UnsupportedResolution => "period resolution is not PT60M",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-series block (or one of its periods) that contributed no records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSeries {
    pub series_index: usize,
    pub period_index: Option<usize>,
    pub reason: SkipReason,
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub namespace: String,
    pub records: Vec<PriceRecord>,
    pub skipped: Vec<SkippedSeries>,
    pub out_of_range: usize,
}

/// Parses the instant formats seen in market documents and in older tabular archives.
///
/// Values carrying an offset are converted to UTC; values without one are taken as UTC.
pub fn parse_instant(value: &str) -> Result<DateTime<Utc>, ParseError> {
    static OFFSET_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M%#z",
        "%Y-%m-%d %H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S%z",
    ];
    static NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%MZ",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt.and_utc());
        }
    }
    Err(ParseError::Instant {
        value: trimmed.to_string(),
    })
}
