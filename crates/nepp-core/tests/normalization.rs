mod common;

use common::{hourly, utc};
use nepp_core::archive::merge_into_archive;
use nepp_core::cleaning::{run_cleaning, CleaningOptions};
use nepp_core::frame::{read_parquet, NORMALIZED_COLUMNS};
use nepp_core::loader::{load_normalized_rows, load_stage};
use nepp_core::normalization::{load_scaler, run_normalization, MinMaxScaler};
use nepp_core::stage::{read_stages, Stage};
use nepp_core::storage::{ArchiveKey, DataLayout};
use nepp_core::{AreaCode, FileStatus};
use tempfile::tempdir;

fn prepared_layout(area: AreaCode) -> (tempfile::TempDir, DataLayout) {
    let dir = tempdir().expect("tempdir");
    let layout = DataLayout::new(dir.path());
    // 2024-01-01 is a Monday.
    merge_into_archive(&layout, area, 2024, &hourly(utc(2024, 1, 1, 0), 48, 100.0)).expect("merge");
    run_cleaning(&layout, area, CleaningOptions::default()).expect("clean");
    (dir, layout)
}

#[test]
fn normalized_table_follows_model_contract() {
    let (_dir, layout) = prepared_layout(AreaCode::NO5);

    let summary = run_normalization(&layout, AreaCode::NO5, false).expect("normalize");
    assert_eq!(summary.processed(), 1);

    let path = layout.archive_path(Stage::Normalized, ArchiveKey::new(AreaCode::NO5, 2024));
    let df = read_parquet(&path).expect("read");
    let columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    assert_eq!(columns, NORMALIZED_COLUMNS.map(String::from).to_vec());
    assert_eq!(df.height(), 48);

    assert_eq!(
        read_stages(&path).expect("stages").to_line(),
        "preprocessed,cleaned,normalized"
    );

    let scaler = load_scaler(&path).expect("scaler").expect("scaler saved");
    assert_eq!(scaler, MinMaxScaler { min: 100.0, max: 147.0 });

    let rows = load_normalized_rows(&layout, AreaCode::NO5, 2024)
        .expect("load")
        .expect("present");
    assert_eq!(rows[0].price, Some(0.0));
    assert_eq!(rows[47].price, Some(1.0));
    assert!((scaler.inverse(rows[10].price.unwrap()) - 110.0).abs() < 1e-9);
    assert_eq!(rows[0].hour_sin, 0.0);
    assert_eq!(rows[0].hour_cos, 1.0);
    assert_eq!(rows[0].day_of_week_sin, 0.0);
    assert_eq!(rows[24].day_of_month, 2);
    assert_eq!(rows[24].month, 1);
    assert_eq!(rows[24].year, 2024);
    for row in &rows {
        let norm = row.hour_sin.powi(2) + row.hour_cos.powi(2);
        assert!((norm - 1.0).abs() < 1e-12);
    }
}

#[test]
fn normalization_requires_cleaned_input() {
    let dir = tempdir().expect("tempdir");
    let layout = DataLayout::new(dir.path());
    merge_into_archive(&layout, AreaCode::NO1, 2024, &hourly(utc(2024, 1, 1, 0), 4, 1.0)).expect("merge");

    // Nothing cleaned yet, so there is nothing to normalize.
    let summary = run_normalization(&layout, AreaCode::NO1, false).expect("normalize");
    assert!(summary.reports.is_empty());
    assert!(load_stage(&layout, AreaCode::NO1, 2024, Stage::Normalized)
        .expect("load")
        .is_none());
}

#[test]
fn normalization_rerun_is_up_to_date() {
    let (_dir, layout) = prepared_layout(AreaCode::NO2);
    run_normalization(&layout, AreaCode::NO2, false).expect("normalize");

    let again = run_normalization(&layout, AreaCode::NO2, false).expect("normalize");
    assert_eq!(again.count(FileStatus::UpToDate), 1);
}
