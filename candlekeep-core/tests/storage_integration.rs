//! Integration tests for the store: persistence across reopen, concurrent
//! writers, maintenance and CSV-backed updates.

use std::fs;
use std::sync::Arc;
use std::thread;

use candlekeep_core::actions::ActionLedger;
use candlekeep_core::domain::{DatasetKey, Exchange, Interval, OhlcvRow};
use candlekeep_core::storage::{SaveMode, StorageError, Store};
use candlekeep_core::sync::{CsvSource, IncrementalUpdater, UpdateOutcome};
use candlekeep_core::StoreConfig;
use tempfile::TempDir;

// ── Helpers ──────────────────────────────────────────────────────────

const BASE: i64 = 1_704_081_600; // 2024-01-01 04:00 UTC

fn minute_rows(start: usize, n: usize) -> Vec<OhlcvRow> {
    (start..start + n)
        .map(|i| {
            let close = 200.0 + (i as f64 * 0.05).sin() * 5.0;
            OhlcvRow::new(
                BASE + i as i64 * 60,
                close - 0.2,
                close + 0.5,
                close - 0.5,
                close,
                10_000 + (i as i64 % 250),
            )
        })
        .collect()
}

fn open_store(dir: &TempDir) -> Store {
    Store::open(StoreConfig::with_root(dir.path())).unwrap()
}

// ── Persistence ──────────────────────────────────────────────────────

#[test]
fn data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let key = DatasetKey::new(Exchange::Nse, "infy", Interval::Minute);
    let rows = minute_rows(0, 500);

    {
        let store = open_store(&dir);
        assert_eq!(store.save(&key, &rows, SaveMode::Overwrite).unwrap(), 500);
    }

    let store = open_store(&dir);
    let read = store.read(&key, None, None).unwrap().unwrap();
    assert_eq!(read, rows);
    assert_eq!(store.list_symbols(Exchange::Nse).unwrap(), vec!["INFY"]);
    assert_eq!(
        store.list_intervals(Exchange::Nse, "INFY").unwrap(),
        vec![Interval::Minute]
    );
}

#[test]
fn datasets_are_isolated_by_interval_and_exchange() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let minute = DatasetKey::new(Exchange::Nse, "TCS", Interval::Minute);
    let five = DatasetKey::new(Exchange::Nse, "TCS", Interval::Minute5);
    let bse = DatasetKey::new(Exchange::Bse, "TCS", Interval::Minute);

    store.save(&minute, &minute_rows(0, 30), SaveMode::Overwrite).unwrap();
    store.save(&five, &minute_rows(0, 6), SaveMode::Overwrite).unwrap();
    store.save(&bse, &minute_rows(0, 10), SaveMode::Overwrite).unwrap();

    assert_eq!(store.read(&minute, None, None).unwrap().unwrap().len(), 30);
    assert_eq!(store.read(&five, None, None).unwrap().unwrap().len(), 6);
    assert_eq!(store.read(&bse, None, None).unwrap().unwrap().len(), 10);

    assert!(store.delete(&five).unwrap());
    assert!(store.read(&five, None, None).unwrap().is_none());
    assert_eq!(store.read(&minute, None, None).unwrap().unwrap().len(), 30);

    let stats = store.stats().unwrap();
    assert_eq!(stats.total_datasets, 2);
    assert_eq!(stats.total_rows, 40);
}

#[test]
fn rejected_batch_leaves_previous_version_readable() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let key = DatasetKey::new(Exchange::Nse, "WIPRO", Interval::Minute);
    store.save(&key, &minute_rows(0, 50), SaveMode::Overwrite).unwrap();

    let mut bad = minute_rows(50, 5);
    bad[2].high = bad[2].low - 1.0;
    let err = store.save(&key, &bad, SaveMode::Merge).unwrap_err();
    assert!(err.is_validation());
    assert!(matches!(err, StorageError::Validation(_)));

    let read = store.read(&key, None, None).unwrap().unwrap();
    assert_eq!(read.len(), 50);
}

// ── Concurrency ──────────────────────────────────────────────────────

#[test]
fn concurrent_merges_on_one_key_are_serialized() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir));
    let key = DatasetKey::new(Exchange::Nse, "HDFC", Interval::Minute);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            let key = key.clone();
            thread::spawn(move || {
                store
                    .save(&key, &minute_rows(t * 25, 25), SaveMode::Merge)
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let rows = store.read(&key, None, None).unwrap().unwrap();
    assert_eq!(rows.len(), 200);
    assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[test]
fn reads_run_alongside_writes_to_other_keys() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir));
    let stable = DatasetKey::new(Exchange::Nse, "STABLE", Interval::Minute);
    store.save(&stable, &minute_rows(0, 100), SaveMode::Overwrite).unwrap();

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let key = DatasetKey::new(Exchange::Nse, "BUSY", Interval::Minute);
            for chunk in 0..10 {
                store
                    .save(&key, &minute_rows(chunk * 10, 10), SaveMode::Merge)
                    .unwrap();
            }
        })
    };
    for _ in 0..20 {
        let rows = store.read(&stable, None, None).unwrap().unwrap();
        assert_eq!(rows.len(), 100);
    }
    writer.join().unwrap();
}

// ── Maintenance ──────────────────────────────────────────────────────

#[test]
fn backup_copies_datasets_and_ledger() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let key = DatasetKey::new(Exchange::Nse, "SBIN", Interval::Minute);
    store.save(&key, &minute_rows(0, 20), SaveMode::Overwrite).unwrap();
    fs::write(store.layout().ledger_path(), "[]").unwrap();

    let backup = store.backup().unwrap();
    let info = store.dataset_info(&key).unwrap().unwrap();
    let copied = backup
        .join("data")
        .join("NSE")
        .join("SBIN")
        .join("minute")
        .join(&info.meta.data_file);
    assert!(copied.is_file());
    assert!(backup.join("corporate_actions.json").is_file());
    assert_eq!(store.list_backups().unwrap(), vec![backup]);
}

#[test]
fn vacuum_removes_crash_leftovers_only() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let key = DatasetKey::new(Exchange::Nse, "LT", Interval::Minute);
    store.save(&key, &minute_rows(0, 20), SaveMode::Overwrite).unwrap();

    let dataset_dir = store.layout().dataset_dir(&key);
    fs::write(dataset_dir.join("rows-00000099.parquet.tmp"), b"partial").unwrap();
    fs::write(dataset_dir.join("rows-00000000.parquet"), b"orphan").unwrap();

    let report = store.vacuum().unwrap();
    assert_eq!(report.removed.len(), 2);
    assert!(report.bytes_freed > 0);
    assert_eq!(store.read(&key, None, None).unwrap().unwrap().len(), 20);
}

// ── CSV-backed incremental update ────────────────────────────────────

#[test]
fn csv_update_appends_only_new_rows() {
    let store_dir = TempDir::new().unwrap();
    let csv_dir = TempDir::new().unwrap();
    let store = open_store(&store_dir);
    let mut ledger = ActionLedger::open(store.layout().ledger_path()).unwrap();
    let key = DatasetKey::new(Exchange::Nse, "ITC", Interval::Minute);

    let source = CsvSource::new(csv_dir.path());
    let path = source.file_for(&key);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut writer = csv::Writer::from_path(&path).unwrap();
    for row in minute_rows(0, 120) {
        writer.serialize(row).unwrap();
    }
    writer.flush().unwrap();

    let updater = IncrementalUpdater::new(&store, &source);
    let first = updater
        .update(&key, BASE, BASE + 59 * 60, &mut ledger)
        .unwrap();
    assert!(matches!(first, UpdateOutcome::Completed { new_rows: 60, .. }));

    let second = updater
        .update(&key, BASE, BASE + 119 * 60, &mut ledger)
        .unwrap();
    match second {
        UpdateOutcome::Completed {
            ranges,
            new_rows,
            total_rows,
            ..
        } => {
            assert_eq!(ranges.len(), 1);
            assert_eq!(ranges[0].from, BASE + 59 * 60 + 1);
            assert_eq!(new_rows, 60);
            assert_eq!(total_rows, 120);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(ledger.is_empty());
}
