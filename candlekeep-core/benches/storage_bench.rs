//! Criterion benchmarks for storage hot paths.
//!
//! Benchmarks:
//! 1. Merge-save of a day's worth of minute rows into a growing dataset
//! 2. Full and ranged reads
//! 3. Validation of a large batch
//! 4. Detection scan

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::TempDir;

use candlekeep_core::actions::Detector;
use candlekeep_core::domain::{DatasetKey, Exchange, Interval, OhlcvRow};
use candlekeep_core::schema::ValidationContext;
use candlekeep_core::storage::{SaveMode, Store};
use candlekeep_core::StoreConfig;

// ── Helpers ──────────────────────────────────────────────────────────

const BASE: i64 = 1_704_081_600;

fn make_rows(start: usize, n: usize) -> Vec<OhlcvRow> {
    (start..start + n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.1).sin() * 10.0;
            OhlcvRow::new(
                BASE + i as i64 * 60,
                close - 0.3,
                close + 1.5,
                close - 1.5,
                close,
                1_000_000 + (i as i64 % 500_000),
            )
        })
        .collect()
}

fn key() -> DatasetKey {
    DatasetKey::new(Exchange::Nse, "BENCH", Interval::Minute)
}

// ── 1. Merge-save ────────────────────────────────────────────────────

fn bench_merge_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_save");
    group.sample_size(20);

    for &existing in &[10_000usize, 100_000] {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::with_root(dir.path())).unwrap();
        store
            .save(&key(), &make_rows(0, existing), SaveMode::Overwrite)
            .unwrap();
        let incoming = make_rows(existing, 375);

        group.bench_with_input(
            BenchmarkId::new("append_375", existing),
            &incoming,
            |b, incoming| {
                b.iter(|| store.save(&key(), black_box(incoming), SaveMode::Merge).unwrap());
            },
        );
    }

    group.finish();
}

// ── 2. Reads ─────────────────────────────────────────────────────────

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    let dir = TempDir::new().unwrap();
    let store = Store::open(StoreConfig::with_root(dir.path())).unwrap();
    store
        .save(&key(), &make_rows(0, 100_000), SaveMode::Overwrite)
        .unwrap();

    group.bench_function("full_100k", |b| {
        b.iter(|| store.read(black_box(&key()), None, None).unwrap());
    });
    group.bench_function("last_day_of_100k", |b| {
        let from = BASE + (100_000 - 375) * 60;
        b.iter(|| store.read(black_box(&key()), Some(from), None).unwrap());
    });

    group.finish();
}

// ── 3. Validation ────────────────────────────────────────────────────

fn bench_validate(c: &mut Criterion) {
    let store_dir = TempDir::new().unwrap();
    let store = Store::open(StoreConfig::with_root(store_dir.path())).unwrap();
    let rows = make_rows(0, 100_000);
    let ctx = ValidationContext::from(&key());

    c.bench_function("validate_100k", |b| {
        b.iter(|| store.validator().check(black_box(&rows), ctx));
    });
}

// ── 4. Detection ─────────────────────────────────────────────────────

fn bench_detect(c: &mut Criterion) {
    let config = StoreConfig::default();
    let detector = Detector::new(&config.detection, config.clock());
    let rows = make_rows(0, 100_000);

    c.bench_function("detect_100k", |b| {
        b.iter(|| detector.detect(black_box(&rows), "BENCH", Exchange::Nse));
    });
}

criterion_group!(
    benches,
    bench_merge_save,
    bench_read,
    bench_validate,
    bench_detect,
);
criterion_main!(benches);
