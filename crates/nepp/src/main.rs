use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use nepp_core::entsoe::EntsoeClient;
use nepp_core::fetch::market_day_range;
use nepp_core::preprocess::{PreprocessOptions, RawSelection};
use nepp_core::{AreaCode, Pipeline, PipelineConfig, StageSummary};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Day-ahead electricity price ETL for the Norwegian bidding zones
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file (defaults to ./nepp.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download raw price documents for the given market-local days
    Fetch(FetchArgs),
    /// Parse raw documents and merge them into per-year archives
    Preprocess(PreprocessArgs),
    /// Deduplicate, gap-fill and forward-fill preprocessed archives
    Clean(StageArgs),
    /// Derive calendar features and scale prices of cleaned archives
    Normalize(StageArgs),
    /// Fetch, preprocess, clean and normalize in one go
    Run(RunArgs),
    /// Count the look-back training windows of a normalized archive
    Windows(TableArgs),
    /// Write a normalized archive as CSV
    Export(ExportArgs),
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Area code (NO1..NO5) or "all"
    #[arg(long)]
    area: Areas,
    /// First day, YYYYMMDD or YYYY-MM-DD
    #[arg(long, value_parser = parse_date)]
    start: NaiveDate,
    /// Last day (inclusive)
    #[arg(long, value_parser = parse_date)]
    end: NaiveDate,
}

#[derive(Args, Debug)]
struct PreprocessArgs {
    #[arg(long)]
    area: Areas,
    /// Keep only records from this market-local day on (same days as `fetch`)
    #[arg(long, value_parser = parse_date, requires = "end")]
    start: Option<NaiveDate>,
    /// Keep only records up to the end of this market-local day
    #[arg(long, value_parser = parse_date, requires = "start")]
    end: Option<NaiveDate>,
    /// Process only the first N raw files
    #[arg(long, conflicts_with = "last")]
    first: Option<usize>,
    /// Process only the last N raw files
    #[arg(long)]
    last: Option<usize>,
    /// Only raw files covering days in this year or later
    #[arg(long)]
    from_year: Option<i32>,
    /// Only raw files covering days in this year or earlier
    #[arg(long)]
    to_year: Option<i32>,
    /// Re-merge documents that were already ingested
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct StageArgs {
    #[arg(long)]
    area: Areas,
    /// Rebuild outputs even when they are up to date
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long)]
    area: Areas,
    #[arg(long, value_parser = parse_date)]
    start: NaiveDate,
    #[arg(long, value_parser = parse_date)]
    end: NaiveDate,
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct TableArgs {
    #[arg(long)]
    area: AreaCode,
    #[arg(long)]
    year: i32,
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[arg(long)]
    area: AreaCode,
    #[arg(long)]
    year: i32,
    /// Destination CSV file
    #[arg(long)]
    output: PathBuf,
}

#[derive(Debug, Clone)]
struct Areas(Vec<AreaCode>);

impl FromStr for Areas {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("all") {
            return Ok(Areas(AreaCode::ALL.to_vec()));
        }
        value
            .split(',')
            .map(|part| part.parse::<AreaCode>().map_err(|err| err.to_string()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Areas)
    }
}

fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .map_err(|_| format!("invalid date '{value}' (expected YYYYMMDD or YYYY-MM-DD)"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let pipeline = Pipeline::new(config).context("Failed to prepare data directories")?;
    info!(data_dir = %pipeline.layout().root().display(), "pipeline ready");

    match cli.command {
        Command::Fetch(args) => handle_fetch(&pipeline, args),
        Command::Preprocess(args) => handle_preprocess(&pipeline, args),
        Command::Clean(args) => {
            let outcomes = for_each_area(&args.area.0, |area| {
                pipeline
                    .clean(area, args.force)
                    .with_context(|| format!("Cleaning failed for {area}"))
            });
            print_summaries(&outcomes.done);
            outcomes.finish()
        }
        Command::Normalize(args) => {
            let outcomes = for_each_area(&args.area.0, |area| {
                pipeline
                    .normalize(area, args.force)
                    .with_context(|| format!("Normalization failed for {area}"))
            });
            print_summaries(&outcomes.done);
            outcomes.finish()
        }
        Command::Run(args) => handle_run(&pipeline, args),
        Command::Windows(args) => handle_windows(&pipeline, args),
        Command::Export(args) => handle_export(&pipeline, args),
    }
}

fn handle_fetch(pipeline: &Pipeline, args: FetchArgs) -> Result<()> {
    let client = EntsoeClient::from_env().context("Cannot create upstream client")?;
    let outcomes = for_each_area(&args.area.0, |area| {
        pipeline
            .fetch(&client, area, args.start, args.end)
            .with_context(|| format!("Fetch failed for {area}"))
    });
    print_summaries(&outcomes.done);
    outcomes.finish()
}

fn handle_preprocess(pipeline: &Pipeline, args: PreprocessArgs) -> Result<()> {
    let days = match (args.start, args.end) {
        (Some(start), Some(end)) => {
            if end < start {
                bail!("--end {end} is before --start {start}");
            }
            Some((start, end))
        }
        _ => None,
    };
    let selection = match (args.first, args.last) {
        (Some(count), _) => RawSelection::First(count),
        (None, Some(count)) => RawSelection::Last(count),
        (None, None) => RawSelection::All,
    };
    let years = match (args.from_year, args.to_year) {
        (None, None) => None,
        (from, to) => Some((from.unwrap_or(i32::MIN), to.unwrap_or(i32::MAX))),
    };

    let outcomes = for_each_area(&args.area.0, |area| {
        let range = days
            .map(|(start, end)| market_day_range(area, start, end))
            .transpose()?;
        let options = PreprocessOptions {
            range,
            selection,
            years,
            force: args.force,
        };
        pipeline
            .preprocess(area, &options)
            .with_context(|| format!("Preprocessing failed for {area}"))
    });
    print_summaries(&outcomes.done);
    outcomes.finish()
}

fn handle_run(pipeline: &Pipeline, args: RunArgs) -> Result<()> {
    let client = EntsoeClient::from_env().context("Cannot create upstream client")?;
    let mut outcomes = for_each_area(&args.area.0, |area| {
        pipeline
            .run(&client, area, args.start, args.end, args.force)
            .with_context(|| format!("Run failed for {area}"))
    });
    let runs = std::mem::take(&mut outcomes.done);
    let aborted: Vec<String> = runs
        .iter()
        .filter(|run| run.aborted)
        .map(|run| run.area.to_string())
        .collect();
    let summaries: Vec<StageSummary> = runs.into_iter().flat_map(|run| run.steps).collect();
    print_summaries(&summaries);
    if !aborted.is_empty() {
        println!("Fetch failed, run aborted for: {}", aborted.join(", "));
    }
    outcomes.finish()
}

fn handle_windows(pipeline: &Pipeline, args: TableArgs) -> Result<()> {
    match pipeline.windows(args.area, args.year)? {
        Some(windows) => println!(
            "{} {}: {} training windows of {} hours",
            args.area,
            args.year,
            windows.len(),
            pipeline.config().windowing.look_back
        ),
        None => println!("{} {}: no normalized table", args.area, args.year),
    }
    Ok(())
}

fn handle_export(pipeline: &Pipeline, args: ExportArgs) -> Result<()> {
    match pipeline
        .export(args.area, args.year, &args.output)
        .with_context(|| format!("Failed to export to '{}'", args.output.display()))?
    {
        Some(rows) => println!("Wrote {rows} rows to {}", args.output.display()),
        None => bail!("no normalized table for {} {}", args.area, args.year),
    }
    Ok(())
}

/// Per-area results of one command. A failing area does not stop the others.
struct AreaOutcomes<T> {
    done: Vec<T>,
    failed: Vec<(AreaCode, anyhow::Error)>,
}

impl<T> AreaOutcomes<T> {
    /// Reports every failed area, then fails if there was any.
    fn finish(self) -> Result<()> {
        if self.failed.is_empty() {
            return Ok(());
        }
        for (area, err) in &self.failed {
            println!("{area}: {err:#}");
        }
        let areas: Vec<String> = self.failed.iter().map(|(area, _)| area.to_string()).collect();
        bail!("failed for {}", areas.join(", "))
    }
}

fn for_each_area<T>(areas: &[AreaCode], mut step: impl FnMut(AreaCode) -> Result<T>) -> AreaOutcomes<T> {
    let mut outcomes = AreaOutcomes {
        done: Vec::new(),
        failed: Vec::new(),
    };
    for &area in areas {
        match step(area) {
            Ok(value) => outcomes.done.push(value),
            Err(err) => {
                let message = format!("{err:#}");
                error!(%area, error = %message, "area failed; continuing with the rest");
                outcomes.failed.push((area, err));
            }
        }
    }
    outcomes
}

fn print_summaries(summaries: &[StageSummary]) {
    let mut table = Table::new();
    table.set_header(vec!["step", "area", "processed", "skipped", "failed", "rows"]);
    for summary in summaries {
        table.add_row(vec![
            summary.step.to_string(),
            summary.area.to_string(),
            summary.processed().to_string(),
            summary.skipped().to_string(),
            summary.failed().to_string(),
            summary.rows().to_string(),
        ]);
    }
    println!("{table}");

    for summary in summaries {
        for report in summary.reports.iter().filter(|r| r.message.is_some()) {
            println!(
                "  [{}] {} {}: {}",
                summary.step,
                report.status,
                report.path.display(),
                report.message.as_deref().unwrap_or_default()
            );
        }
    }
}
