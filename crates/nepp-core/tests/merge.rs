mod common;

use chrono::{Datelike, Duration};
use common::{hourly, record, utc};
use nepp_core::archive::{merge, merge_into_archive, partition_by_year};
use nepp_core::frame::read_rows;
use nepp_core::stage::{has_stage, Stage};
use nepp_core::storage::DataLayout;
use nepp_core::AreaCode;
use nepp_parser::PriceRecord;
use tempfile::tempdir;

fn assert_archive_invariants(records: &[PriceRecord], year: i32) {
    assert!(records
        .windows(2)
        .all(|pair| pair[0].period_start < pair[1].period_start));
    assert!(records.iter().all(|r| r.period_start.year() == year));
    assert!(records
        .iter()
        .all(|r| r.period_end == r.period_start + Duration::hours(1)));
}

#[test]
fn hundred_plus_five_with_two_collisions_yields_one_hundred_three() {
    let start = utc(2023, 3, 1, 0);
    let existing = hourly(start, 100, 50.0);

    // Two new records collide with hours 10 and 99, three extend past the end.
    let incoming = vec![
        record(start + Duration::hours(10), 999.0),
        record(start + Duration::hours(99), 888.0),
        record(start + Duration::hours(100), 1.0),
        record(start + Duration::hours(101), 2.0),
        record(start + Duration::hours(102), 3.0),
    ];

    let merged = merge(&existing, &incoming, 2023);

    assert_eq!(merged.len(), 103);
    assert_archive_invariants(&merged, 2023);
    assert_eq!(merged[10].price, 999.0);
    assert_eq!(merged[99].price, 888.0);
    assert_eq!(merged[9].price, 59.0);
    assert_eq!(merged[102].price, 3.0);
}

#[test]
fn merging_the_same_batch_twice_is_idempotent() {
    let existing = hourly(utc(2023, 6, 1, 0), 48, 10.0);
    let batch = hourly(utc(2023, 6, 2, 12), 24, 70.0);

    let once = merge(&existing, &batch, 2023);
    let twice = merge(&once, &batch, 2023);

    assert_eq!(once, twice);
}

#[test]
fn disjoint_batches_commute() {
    let existing = hourly(utc(2023, 1, 1, 0), 24, 10.0);
    let b1 = hourly(utc(2023, 1, 2, 0), 24, 20.0);
    let b2 = hourly(utc(2023, 1, 5, 0), 24, 30.0);

    let left = merge(&merge(&existing, &b1, 2023), &b2, 2023);
    let right = merge(&merge(&existing, &b2, 2023), &b1, 2023);

    assert_eq!(left, right);
    assert_eq!(left.len(), 72);
}

#[test]
fn batches_agreeing_on_overlap_commute() {
    let existing = hourly(utc(2023, 1, 1, 0), 24, 10.0);
    let b1 = hourly(utc(2023, 1, 1, 12), 24, 22.0);
    let b2 = hourly(utc(2023, 1, 1, 18), 24, 28.0);

    let left = merge(&merge(&existing, &b1, 2023), &b2, 2023);
    let right = merge(&merge(&existing, &b2, 2023), &b1, 2023);

    assert_eq!(left, right);
}

#[test]
fn later_record_in_batch_wins() {
    let ts = utc(2023, 5, 5, 5);
    let merged = merge(&[], &[record(ts, 1.0), record(ts, 2.0)], 2023);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].price, 2.0);
}

#[test]
fn archive_duplicates_keep_first_seen() {
    let ts = utc(2023, 5, 5, 5);
    let merged = merge(&[record(ts, 1.0), record(ts, 2.0)], &[], 2023);
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].price, 1.0);
}

#[test]
fn records_from_other_years_are_left_out() {
    // A batch straddling New Year in UTC.
    let batch = hourly(utc(2023, 12, 31, 22), 4, 1.0);

    let merged_2023 = merge(&[], &batch, 2023);
    let merged_2024 = merge(&[], &batch, 2024);

    assert_eq!(merged_2023.len(), 2);
    assert_eq!(merged_2024.len(), 2);
    assert_archive_invariants(&merged_2023, 2023);
    assert_archive_invariants(&merged_2024, 2024);

    let years = partition_by_year(&batch);
    assert_eq!(years.keys().copied().collect::<Vec<_>>(), vec![2023, 2024]);
}

#[test]
fn persisted_archive_round_trips_and_is_marked() {
    let dir = tempdir().expect("tempdir");
    let layout = DataLayout::new(dir.path());

    let first = hourly(utc(2023, 10, 1, 22), 24, 40.0);
    let outcome = merge_into_archive(&layout, AreaCode::NO1, 2023, &first).expect("first merge");
    assert_eq!(outcome.previous_rows, 0);
    assert_eq!(outcome.merged_rows, 24);
    assert!(has_stage(&outcome.path, Stage::Preprocessed));

    let overlap = hourly(utc(2023, 10, 2, 10), 24, 90.0);
    let outcome = merge_into_archive(&layout, AreaCode::NO1, 2023, &overlap).expect("second merge");
    assert_eq!(outcome.previous_rows, 24);
    assert_eq!(outcome.incoming_rows, 24);
    assert_eq!(outcome.replaced, 12);
    assert_eq!(outcome.merged_rows, 36);

    let rows = read_rows(&outcome.path).expect("read archive");
    let records: Vec<PriceRecord> = rows.iter().filter_map(|row| row.to_record()).collect();
    assert_eq!(records.len(), 36);
    assert_archive_invariants(&records, 2023);
    assert_eq!(records[12].period_start, utc(2023, 10, 2, 10));
    assert_eq!(records[12].price, 90.0);
}
