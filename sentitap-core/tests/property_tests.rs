//! Property tests for acquisition invariants.
//!
//! Uses proptest to verify:
//! 1. Window coverage: planned windows tile `[start, end)` exactly
//! 2. Merge ordering: output is sorted and independent of batch order
//! 3. Audit idempotence: auditing the same frame twice gives the same report
//! 4. Missing points: removing grid points is reported exactly

use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use sentitap_core::domain::{BinSize, CanonicalFrame, CanonicalRecord, MeasurementValue};
use sentitap_core::{audit, merge_batches, plan_windows, AuditPolicy};
use std::collections::BTreeMap;

// ── Strategies (proptest) ────────────────────────────────────────────

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn arb_bin() -> impl Strategy<Value = BinSize> {
    prop::sample::select(BinSize::ALL.to_vec())
}

fn record(hour_offset: i64, value: i64) -> CanonicalRecord {
    let datetime = base() + Duration::hours(hour_offset);
    CanonicalRecord {
        datetime,
        t_epoch: datetime.and_utc().timestamp(),
        source: "twitter".into(),
        series_id: "bitcoin".into(),
        bin_size: BinSize::OneHour,
        measurements: BTreeMap::from([("twitter_hacks".to_string(), MeasurementValue::Int(value))]),
    }
}

fn arb_batches() -> impl Strategy<Value = Vec<Vec<CanonicalRecord>>> {
    prop::collection::vec(
        prop::collection::vec((0i64..48, 0i64..20).prop_map(|(h, v)| record(h, v)), 0..12),
        0..6,
    )
}

// ── 1. Window coverage ───────────────────────────────────────────────

proptest! {
    #[test]
    fn windows_tile_the_span(
        start_secs in 0i64..86_400,
        span_secs in 1i64..(40 * 86_400),
        bin in arb_bin(),
        row_cap in 1usize..2000,
    ) {
        let start = base() + Duration::seconds(start_secs);
        let end = start + Duration::seconds(span_secs);
        let windows = plan_windows(start, end, bin, row_cap).unwrap();

        prop_assert!(!windows.is_empty());
        prop_assert_eq!(windows[0].start, start);
        prop_assert_eq!(windows[windows.len() - 1].end, end);
        let max_len = bin.unit_duration() * row_cap as i32;
        for w in &windows {
            prop_assert!(w.start < w.end);
            prop_assert!(w.duration() <= max_len);
        }
        for pair in windows.windows(2) {
            prop_assert_eq!(pair[0].end, pair[1].start);
        }
    }
}

// ── 2. Merge ordering ────────────────────────────────────────────────

proptest! {
    #[test]
    fn merge_is_sorted_and_order_invariant(batches in arb_batches()) {
        let total: usize = batches.iter().map(Vec::len).sum();
        let mut reversed = batches.clone();
        reversed.reverse();

        let merged = merge_batches(batches);
        prop_assert_eq!(merged.height(), total);
        prop_assert!(merged.datetimes().windows(2).all(|p| p[0] <= p[1]));
        prop_assert_eq!(merged, merge_batches(reversed));
    }
}

// ── 3. Audit idempotence ─────────────────────────────────────────────

proptest! {
    #[test]
    fn audit_is_deterministic(batches in arb_batches()) {
        let frame = merge_batches(batches);
        let policy = AuditPolicy::default();
        let first = audit(&frame, BinSize::OneHour, None, &policy).unwrap();
        let second = audit(&frame, BinSize::OneHour, None, &policy).unwrap();
        prop_assert_eq!(first, second);
    }
}

// ── 4. Missing points ────────────────────────────────────────────────

proptest! {
    #[test]
    fn removed_grid_points_are_reported(
        len in 3i64..60,
        holes in prop::collection::btree_set(1i64..59, 0..10),
    ) {
        let holes: Vec<i64> = holes.into_iter().filter(|h| *h < len - 1).collect();
        let records = (0..len)
            .filter(|h| !holes.contains(h))
            .map(|h| record(h, 1))
            .collect();
        let frame = CanonicalFrame::from_records(records);

        let report = audit(&frame, BinSize::OneHour, None, &AuditPolicy::default()).unwrap();
        let expected: Vec<NaiveDateTime> = holes.iter().map(|h| base() + Duration::hours(*h)).collect();
        prop_assert_eq!(report.missing_time_points, expected);
        prop_assert!(report.duplicate_timestamps.is_empty());
    }
}
