//! Property tests for storage invariants.
//!
//! Uses proptest to verify:
//! 1. Round-trip: what is saved is what is read, in order
//! 2. Merge idempotence: merging a dataset into itself changes nothing
//! 3. Ordering: any sequence of merges leaves strictly ascending timestamps
//! 4. Forward-only gaps: missing ranges never reach before stored data

use std::collections::BTreeMap;

use candlekeep_core::domain::{DatasetKey, Exchange, Interval, OhlcvRow};
use candlekeep_core::storage::{SaveMode, Store};
use candlekeep_core::StoreConfig;
use proptest::prelude::*;
use tempfile::TempDir;

const BASE: i64 = 1_704_081_600;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_row(minute: u32) -> impl Strategy<Value = OhlcvRow> {
    (
        10.0..1_000.0_f64,
        -0.02..0.02_f64,
        0.0..0.02_f64,
        0.0..0.02_f64,
        0_i64..5_000_000,
    )
        .prop_map(move |(close, open_off, up, down, volume)| {
            let open = close * (1.0 + open_off);
            OhlcvRow::new(
                BASE + i64::from(minute) * 60,
                open,
                open.max(close) * (1.0 + up),
                open.min(close) * (1.0 - down),
                close,
                volume,
            )
        })
}

/// Ascending rows with unique timestamps.
fn arb_rows(max: usize) -> impl Strategy<Value = Vec<OhlcvRow>> {
    prop::collection::btree_set(0u32..20_000, 1..max).prop_flat_map(|minutes| {
        minutes
            .into_iter()
            .map(arb_row)
            .collect::<Vec<_>>()
    })
}

fn scratch() -> (TempDir, Store, DatasetKey) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(StoreConfig::with_root(dir.path())).unwrap();
    let key = DatasetKey::new(Exchange::Nse, "PROP", Interval::Minute);
    (dir, store, key)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // ── 1. Round-trip ────────────────────────────────────────────────

    #[test]
    fn saved_rows_read_back_unchanged(rows in arb_rows(80)) {
        let (_dir, store, key) = scratch();
        let stored = store.save(&key, &rows, SaveMode::Overwrite).unwrap();
        prop_assert_eq!(stored, rows.len());

        let read = store.read(&key, None, None).unwrap().unwrap();
        prop_assert_eq!(read, rows);
    }

    #[test]
    fn range_reads_are_inclusive_slices(rows in arb_rows(80), a in 0u32..20_000, b in 0u32..20_000) {
        let (_dir, store, key) = scratch();
        store.save(&key, &rows, SaveMode::Overwrite).unwrap();

        let (lo, hi) = (a.min(b), a.max(b));
        let (from, to) = (BASE + i64::from(lo) * 60, BASE + i64::from(hi) * 60);
        let read = store.read(&key, Some(from), Some(to)).unwrap().unwrap();
        let expected: Vec<OhlcvRow> = rows
            .iter()
            .filter(|r| from <= r.timestamp && r.timestamp <= to)
            .copied()
            .collect();
        prop_assert_eq!(read, expected);
    }

    // ── 2. Merge idempotence ─────────────────────────────────────────

    #[test]
    fn merging_the_same_rows_twice_is_a_noop(rows in arb_rows(60)) {
        let (_dir, store, key) = scratch();
        store.save(&key, &rows, SaveMode::Merge).unwrap();
        let count = store.save(&key, &rows, SaveMode::Merge).unwrap();

        prop_assert_eq!(count, rows.len());
        prop_assert_eq!(store.read(&key, None, None).unwrap().unwrap(), rows);
    }

    // ── 3. Ordering ──────────────────────────────────────────────────

    #[test]
    fn merges_keep_timestamps_strictly_ascending(
        first in arb_rows(50),
        second in arb_rows(50),
    ) {
        let (_dir, store, key) = scratch();
        store.save(&key, &first, SaveMode::Merge).unwrap();
        let count = store.save(&key, &second, SaveMode::Merge).unwrap();

        // Incoming rows replace stored rows with the same timestamp.
        let mut expected: BTreeMap<i64, OhlcvRow> =
            first.iter().map(|r| (r.timestamp, *r)).collect();
        expected.extend(second.iter().map(|r| (r.timestamp, *r)));

        let read = store.read(&key, None, None).unwrap().unwrap();
        prop_assert_eq!(count, expected.len());
        prop_assert!(read.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        prop_assert_eq!(read, expected.into_values().collect::<Vec<_>>());
    }

    // ── 4. Forward-only gaps ─────────────────────────────────────────

    #[test]
    fn missing_ranges_start_after_stored_data(
        rows in arb_rows(40),
        from_min in 0u32..40_000,
        to_min in 0u32..40_000,
    ) {
        let (_dir, store, key) = scratch();
        store.save(&key, &rows, SaveMode::Overwrite).unwrap();
        let existing = store.existing_range(&key).unwrap().unwrap();

        let from = BASE + i64::from(from_min) * 60;
        let to = BASE + i64::from(to_min) * 60;
        let gaps = store.missing_ranges(&key, from, to).unwrap();

        prop_assert!(gaps.len() <= 1);
        for gap in &gaps {
            prop_assert!(gap.from > existing.to);
            prop_assert_eq!(gap.from, existing.to + 1);
            prop_assert_eq!(gap.to, to);
        }
        if from <= to && existing.to < to {
            prop_assert_eq!(gaps.len(), 1);
        } else {
            prop_assert!(gaps.is_empty());
        }
    }
}
