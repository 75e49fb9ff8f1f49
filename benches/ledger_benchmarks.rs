//! Ledger store benchmarks
//!
//! Benchmarks for the file-locked JSON ledger:
//! - Batched appends (lock + load + atomic replace per call)
//! - Id lookups over growing ledgers
//! - Prefix-regex name queries

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use run_ledger::{Ledger, RunRecord};

/// Create `count` runs with a handful of metrics each
fn create_runs(count: usize) -> Vec<RunRecord> {
    (0..count)
        .map(|i| {
            let mut run = RunRecord::builder(format!("run-{i:06}"), format!("exp-{}", i % 10))
                .args("train --epochs 10")
                .build();
            for metric in ["loss", "f1", "auc"] {
                #[allow(clippy::cast_precision_loss)]
                run.log_metric(metric, i as f64 / 1_000.0);
            }
            run
        })
        .collect()
}

/// Open a fresh ledger holding `count` runs
fn populated_ledger(count: usize) -> (tempfile::TempDir, Ledger) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(dir.path().join("ledger.json")).unwrap();
    ledger.add_new(&create_runs(count)).unwrap();
    (dir, ledger)
}

/// Benchmark appending a batch to an empty ledger
fn bench_add_new(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_add_new");

    for size in [10, 100, 1_000].iter() {
        let runs = create_runs(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter_with_setup(
                || {
                    let dir = tempfile::tempdir().unwrap();
                    let ledger = Ledger::open(dir.path().join("ledger.json")).unwrap();
                    (dir, ledger)
                },
                |(_dir, ledger)| {
                    ledger.add_new(black_box(&runs)).unwrap();
                },
            );
        });
    }

    group.finish();
}

/// Benchmark id lookup (full document load under the shared lock)
fn bench_get_by_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_get_by_id");

    for size in [100, 1_000, 5_000].iter() {
        let (_dir, ledger) = populated_ledger(*size);
        let last = format!("run-{:06}", size - 1);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let run = ledger.get_by_id(black_box(&last)).unwrap();
                black_box(run);
            });
        });
    }

    group.finish();
}

/// Benchmark prefix-regex name queries
fn bench_name_regex(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_name_regex");

    for size in [100, 1_000, 5_000].iter() {
        let (_dir, ledger) = populated_ledger(*size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let runs = ledger.get_by_name_regex(black_box(r"exp-[13]")).unwrap();
                black_box(runs);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add_new, bench_get_by_id, bench_name_regex);
criterion_main!(benches);
