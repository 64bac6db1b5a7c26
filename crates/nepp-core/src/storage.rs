use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use glob::glob;

use crate::area::AreaCode;
use crate::error::{PipelineError, Result};
use crate::stage::Stage;

const RAW_SUFFIX: &str = "_prices.xml";
const ARCHIVE_EXTENSION: &str = "parquet";
const LEDGER_FILE: &str = ".ingested.json";

/// Directory layout under the configured data root.
///
/// ```text
/// {root}/raw/{AREA}/{AREA}_{YYYYMMDD}_to_{YYYYMMDD}_prices.xml
/// {root}/processed/{stage}/{AREA}/{AREA}_{YEAR}.parquet
/// ```
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    pub fn raw_area_dir(&self, area: AreaCode) -> PathBuf {
        self.raw_dir().join(area.as_str())
    }

    pub fn raw_file_path(&self, area: AreaCode, first_day: NaiveDate, last_day: NaiveDate) -> PathBuf {
        let name = RawFileName {
            area,
            first_day,
            last_day,
        };
        self.raw_area_dir(area).join(name.to_string())
    }

    pub fn ledger_path(&self, area: AreaCode) -> PathBuf {
        self.raw_area_dir(area).join(LEDGER_FILE)
    }

    pub fn stage_dir(&self, stage: Stage) -> PathBuf {
        self.root.join("processed").join(stage.as_str())
    }

    pub fn stage_area_dir(&self, stage: Stage, area: AreaCode) -> PathBuf {
        self.stage_dir(stage).join(area.as_str())
    }

    pub fn archive_path(&self, stage: Stage, key: ArchiveKey) -> PathBuf {
        self.stage_area_dir(stage, key.area).join(key.file_name())
    }

    /// Creates the raw and per-stage directories for every area.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        for area in AreaCode::ALL {
            fs::create_dir_all(self.raw_area_dir(area))?;
            for stage in Stage::ALL {
                fs::create_dir_all(self.stage_area_dir(stage, area))?;
            }
        }
        Ok(())
    }

    /// Raw documents for `area`, sorted by file name (and therefore by first day).
    pub fn list_raw_files(&self, area: AreaCode) -> Result<Vec<PathBuf>> {
        let pattern = self
            .raw_area_dir(area)
            .join(format!("{}_*{}", area.as_str(), RAW_SUFFIX));
        let mut files = collect_glob(&pattern)?;
        files.retain(|path| RawFileName::from_path(path).is_some_and(|name| name.area == area));
        files.sort();
        Ok(files)
    }

    /// Archive keys present at `stage` for `area`, ascending by year.
    pub fn list_archives(&self, stage: Stage, area: AreaCode) -> Result<Vec<ArchiveKey>> {
        let pattern = self
            .stage_area_dir(stage, area)
            .join(format!("{}_*.{}", area.as_str(), ARCHIVE_EXTENSION));
        let mut keys: Vec<ArchiveKey> = collect_glob(&pattern)?
            .iter()
            .filter_map(|path| ArchiveKey::from_path(path))
            .filter(|key| key.area == area)
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

fn collect_glob(pattern: &Path) -> Result<Vec<PathBuf>> {
    let pattern = pattern.to_string_lossy();
    let mut paths = Vec::new();
    for entry in glob(&pattern)? {
        match entry {
            Ok(path) => paths.push(path),
            Err(err) => {
                let path = err.path().to_path_buf();
                return Err(PipelineError::io(path, err.into_error()));
            }
        }
    }
    Ok(paths)
}

/// Identity of one persisted archive: a zone and a UTC calendar year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchiveKey {
    pub area: AreaCode,
    pub year: i32,
}

impl ArchiveKey {
    pub fn new(area: AreaCode, year: i32) -> Self {
        Self { area, year }
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.{}", self.area, self.year, ARCHIVE_EXTENSION)
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let stem = path
            .extension()
            .filter(|ext| *ext == ARCHIVE_EXTENSION)
            .and(path.file_stem())?
            .to_str()?;
        let (area, year) = stem.split_once('_')?;
        Some(Self {
            area: area.parse().ok()?,
            year: year.parse().ok()?,
        })
    }
}

/// `{AREA}_{YYYYMMDD}_to_{YYYYMMDD}_prices.xml`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFileName {
    pub area: AreaCode,
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
}

impl RawFileName {
    pub fn parse(name: &str) -> Option<Self> {
        let body = name.strip_suffix(RAW_SUFFIX)?;
        let mut parts = body.split('_');
        let area = parts.next()?.parse().ok()?;
        let first_day = NaiveDate::parse_from_str(parts.next()?, "%Y%m%d").ok()?;
        if parts.next()? != "to" {
            return None;
        }
        let last_day = NaiveDate::parse_from_str(parts.next()?, "%Y%m%d").ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            area,
            first_day,
            last_day,
        })
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name().and_then(|name| name.to_str()).and_then(Self::parse)
    }

    /// True when the covered days touch any year in `first..=last`.
    pub fn overlaps_years(&self, first: i32, last: i32) -> bool {
        self.first_day.year() <= last && self.last_day.year() >= first
    }
}

impl std::fmt::Display for RawFileName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}_to_{}{}",
            self.area,
            self.first_day.format("%Y%m%d"),
            self.last_day.format("%Y%m%d"),
            RAW_SUFFIX
        )
    }
}

/// Writes `bytes` to a hidden sibling and renames it over `path`.
///
/// Readers see either the previous contents or the new ones, never a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
    fs::write(&tmp, bytes)?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}
