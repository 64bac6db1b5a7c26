use std::path::PathBuf;
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use nepp_parser::DateRange;
use thiserror::Error;
use tracing::{info, warn};

use crate::area::AreaCode;
use crate::report::{FileReport, FileStatus, StageSummary};
use crate::storage::{write_atomic, DataLayout};

/// Upper bound on the days covered by one upstream query.
pub const MAX_CHUNK_DAYS: u32 = 370;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no API token configured (set ENTSOE_API_KEY)")]
    MissingToken,

    #[error("invalid fetch range {start}..={end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    #[error("failed to store raw document {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Http { .. } | FetchError::Transport(_))
    }
}

/// One upstream query: whole market-local days `first_day..=last_day` as a UTC interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
    pub start: DateTime<Utc>,
    /// Exclusive: the market-local midnight after `last_day`.
    pub end: DateTime<Utc>,
}

fn local_midnight(area: AreaCode, day: NaiveDate) -> Option<DateTime<Utc>> {
    area.timezone()
        .from_local_datetime(&day.and_time(NaiveTime::MIN))
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

/// Splits `start..=end` (market-local calendar days) into windows of at most
/// `max_chunk_days` days, clamped to `1..=MAX_CHUNK_DAYS`.
pub fn plan_windows(
    area: AreaCode,
    start: NaiveDate,
    end: NaiveDate,
    max_chunk_days: u32,
) -> Result<Vec<FetchWindow>, FetchError> {
    if end < start {
        return Err(FetchError::InvalidRange { start, end });
    }
    let chunk = i64::from(max_chunk_days.clamp(1, MAX_CHUNK_DAYS));

    let mut windows = Vec::new();
    let mut first_day = start;
    while first_day <= end {
        let last_day = (first_day + Duration::days(chunk - 1)).min(end);
        let next_day = last_day + Duration::days(1);
        let (Some(window_start), Some(window_end)) =
            (local_midnight(area, first_day), local_midnight(area, next_day))
        else {
            return Err(FetchError::InvalidRange { start, end });
        };
        windows.push(FetchWindow {
            first_day,
            last_day,
            start: window_start,
            end: window_end,
        });
        first_day = next_day;
    }
    Ok(windows)
}

/// UTC instants covering the market-local days `start..=end`, end inclusive to the second.
pub fn market_day_range(area: AreaCode, start: NaiveDate, end: NaiveDate) -> Result<DateRange, FetchError> {
    if end < start {
        return Err(FetchError::InvalidRange { start, end });
    }
    match (local_midnight(area, start), local_midnight(area, end + Duration::days(1))) {
        (Some(first), Some(after_last)) => Ok(DateRange::new(first, after_last - Duration::seconds(1))),
        _ => Err(FetchError::InvalidRange { start, end }),
    }
}

/// Source of raw market documents.
pub trait Fetcher {
    fn fetch(&self, area: AreaCode, window: &FetchWindow) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: StdDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: StdDuration::from_secs(5),
        }
    }
}

/// Calls `fetcher` up to `policy.max_attempts` times with a fixed delay between attempts.
/// Non-retryable errors are returned immediately.
pub fn fetch_with_retries<F: Fetcher + ?Sized>(
    fetcher: &F,
    area: AreaCode,
    window: &FetchWindow,
    policy: RetryPolicy,
) -> Result<Vec<u8>, FetchError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match fetcher.fetch(area, window) {
            Ok(bytes) => return Ok(bytes),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt >= attempts => {
                return Err(FetchError::Exhausted {
                    attempts,
                    last: Box::new(err),
                })
            }
            Err(err) => {
                warn!(
                    %area,
                    first_day = %window.first_day,
                    last_day = %window.last_day,
                    attempt,
                    error = %err,
                    "fetch failed, retrying"
                );
                if !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
                attempt += 1;
            }
        }
    }
}

/// Fetches `start..=end` for `area` and stores each window as its own raw document.
///
/// Stops at the first window that cannot be fetched; windows already stored are kept.
pub fn fetch_area<F: Fetcher + ?Sized>(
    layout: &DataLayout,
    fetcher: &F,
    area: AreaCode,
    start: NaiveDate,
    end: NaiveDate,
    max_chunk_days: u32,
    policy: RetryPolicy,
) -> Result<StageSummary, FetchError> {
    let windows = plan_windows(area, start, end, max_chunk_days)?;
    let mut summary = StageSummary::new("fetch", area);

    for window in &windows {
        let path = layout.raw_file_path(area, window.first_day, window.last_day);
        let bytes = match fetch_with_retries(fetcher, area, window, policy) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%area, path = %path.display(), error = %err, "fetch failed, aborting area");
                summary.push(FileReport::with_status(&path, FileStatus::Failed, err.to_string()));
                break;
            }
        };
        if let Err(source) = write_atomic(&path, &bytes) {
            let err = FetchError::Io { path: path.clone(), source };
            warn!(%area, error = %err, "failed to store raw document");
            summary.push(FileReport::with_status(&path, FileStatus::Failed, err.to_string()));
            break;
        }
        info!(%area, path = %path.display(), bytes = bytes.len(), "stored raw document");
        summary.push(FileReport::processed(&path, 0));
    }

    Ok(summary)
}
