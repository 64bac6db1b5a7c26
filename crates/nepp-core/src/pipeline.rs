use std::path::Path;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::area::AreaCode;
use crate::cleaning::{run_cleaning, CleaningOptions};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::export::export_normalized;
use crate::fetch::{fetch_area, market_day_range, Fetcher};
use crate::loader::load_normalized_rows;
use crate::normalization::run_normalization;
use crate::preprocess::{preprocess_area, PreprocessOptions};
use crate::report::StageSummary;
use crate::storage::DataLayout;
use crate::windowing::{build_windows, TrainingWindow};

/// Outcome of a full fetch → preprocess → clean → normalize run for one area.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub area: AreaCode,
    pub steps: Vec<StageSummary>,
    /// Set when the fetch failed and later steps were not attempted.
    pub aborted: bool,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.steps.iter().map(StageSummary::failed).sum()
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    layout: DataLayout,
}

impl Pipeline {
    /// Creates the data directories; failing to do so is a configuration error.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let layout = config.layout();
        layout.ensure_dirs().map_err(|err| {
            PipelineError::Config(format!(
                "cannot create data directories under {}: {err}",
                layout.root().display()
            ))
        })?;
        Ok(Self { config, layout })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn fetch<F: Fetcher + ?Sized>(
        &self,
        fetcher: &F,
        area: AreaCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<StageSummary> {
        Ok(fetch_area(
            &self.layout,
            fetcher,
            area,
            start,
            end,
            self.config.max_chunk_days(),
            self.config.retry_policy(),
        )?)
    }

    pub fn preprocess(&self, area: AreaCode, options: &PreprocessOptions) -> Result<StageSummary> {
        preprocess_area(&self.layout, area, options)
    }

    pub fn clean(&self, area: AreaCode, force: bool) -> Result<StageSummary> {
        let options = CleaningOptions {
            fill_missing_hours: self.config.cleaning.fill_missing_hours,
            force,
        };
        run_cleaning(&self.layout, area, options)
    }

    pub fn normalize(&self, area: AreaCode, force: bool) -> Result<StageSummary> {
        run_normalization(&self.layout, area, force)
    }

    /// Runs every step for `area` over the market-local days `start..=end`.
    ///
    /// Preprocessing keeps only records inside the fetched windows. A failed fetch aborts
    /// the run before any archive is touched.
    pub fn run<F: Fetcher + ?Sized>(
        &self,
        fetcher: &F,
        area: AreaCode,
        start: NaiveDate,
        end: NaiveDate,
        force: bool,
    ) -> Result<RunSummary> {
        let range = market_day_range(area, start, end)?;
        let mut summary = RunSummary {
            area,
            steps: Vec::new(),
            aborted: false,
        };

        let fetched = self.fetch(fetcher, area, start, end)?;
        let fetch_failed = fetched.failed() > 0;
        summary.steps.push(fetched);
        if fetch_failed {
            warn!(%area, "fetch failed; skipping preprocess, clean and normalize");
            summary.aborted = true;
            return Ok(summary);
        }

        let options = PreprocessOptions {
            range: Some(range),
            force,
            ..Default::default()
        };
        summary.steps.push(self.preprocess(area, &options)?);
        summary.steps.push(self.clean(area, force)?);
        summary.steps.push(self.normalize(area, force)?);

        info!(%area, failed = summary.failed(), "run finished");
        Ok(summary)
    }

    /// Training windows built from the normalized table of (`area`, `year`).
    pub fn windows(&self, area: AreaCode, year: i32) -> Result<Option<Vec<TrainingWindow>>> {
        Ok(load_normalized_rows(&self.layout, area, year)?
            .map(|rows| build_windows(&rows, self.config.windowing.look_back)))
    }

    /// Writes the normalized table of (`area`, `year`) as CSV. Returns the row count, or
    /// `None` when no normalized table exists.
    pub fn export(&self, area: AreaCode, year: i32, path: &Path) -> Result<Option<usize>> {
        let Some(rows) = load_normalized_rows(&self.layout, area, year)? else {
            return Ok(None);
        };
        export_normalized(path, &rows)?;
        info!(%area, year, path = %path.display(), rows = rows.len(), "exported normalized table");
        Ok(Some(rows.len()))
    }
}
