//! Performance benchmarks for the sync engine.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use expense_sync::{
    plan, records_from_rows, to_remote, Category, EngineConfig, ExpenseDraft, MemoryRemote,
    MergeStrategy, OwnerId, Record, RecordId, SessionEvent, SyncEngine,
};
use std::sync::Arc;
use tempfile::TempDir;

fn make_records(count: usize) -> Vec<Record> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| Record {
            id: RecordId::new(),
            name: format!("Expense {i}"),
            amount: 1.0 + i as f64,
            category: Category::ALL[i % Category::ALL.len()],
            location: (i % 3 == 0).then(|| "Market".to_string()),
            occurred_at: start + ChronoDuration::minutes(i as i64),
        })
        .collect()
}

/// Benchmark merge planning with half the local set already remote
fn bench_reconcile_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_plan");
    let owner = OwnerId::new("alice");

    for size in [100, 1_000, 10_000] {
        let local = make_records(size);
        let remote: Vec<Record> = local
            .iter()
            .step_by(2)
            .cloned()
            .map(|mut r| {
                r.amount += 1.0;
                r
            })
            .collect();

        for strategy in [MergeStrategy::RemoteWins, MergeStrategy::FieldMerge] {
            group.bench_with_input(
                BenchmarkId::new(format!("{strategy:?}"), size),
                &size,
                |b, _| {
                    b.iter(|| black_box(plan(&owner, &local, &remote, strategy)));
                },
            );
        }
    }

    group.finish();
}

/// Benchmark decoding a full fetch
fn bench_decode_fetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_fetch");
    let owner = OwnerId::new("alice");

    for size in [100, 1_000, 10_000] {
        let rows: Vec<_> = make_records(size)
            .iter()
            .map(|r| to_remote(r, &owner))
            .collect();

        group.bench_with_input(BenchmarkId::new("rows", size), &rows, |b, rows| {
            b.iter(|| black_box(records_from_rows(rows.clone())));
        });
    }

    group.finish();
}

/// Benchmark a local create against the on-disk slot, signed in and out
fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("create");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for signed_in in [false, true] {
        let dir = TempDir::new().unwrap();
        let engine = SyncEngine::open(
            EngineConfig {
                data_dir: dir.path().to_path_buf(),
                auto_drain: false,
                ..Default::default()
            },
            Arc::new(MemoryRemote::new()),
        )
        .unwrap();

        if signed_in {
            runtime
                .block_on(engine.handle_session(SessionEvent::Established(OwnerId::new("alice"))))
                .unwrap();
        }

        group.bench_function(BenchmarkId::new("signed_in", signed_in), |b| {
            b.iter(|| {
                engine
                    .create(ExpenseDraft::new("Coffee", 3.2, Category::Food, Utc::now()))
                    .unwrap()
            });
        });
    }

    group.finish();
}

/// Benchmark a full sign-in pass against the in-memory remote
fn bench_sign_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("sign_in");
    group.sample_size(20);
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for size in [100, 1_000] {
        group.bench_with_input(BenchmarkId::new("local_records", size), &size, |b, &size| {
            b.to_async(&runtime).iter(|| async move {
                let dir = TempDir::new().unwrap();
                let engine = SyncEngine::open(
                    EngineConfig {
                        data_dir: dir.path().to_path_buf(),
                        auto_drain: false,
                        ..Default::default()
                    },
                    Arc::new(MemoryRemote::new()),
                )
                .unwrap();
                for record in make_records(size) {
                    engine
                        .create(ExpenseDraft::new(
                            record.name,
                            record.amount,
                            record.category,
                            record.occurred_at,
                        ))
                        .unwrap();
                }

                black_box(
                    engine
                        .handle_session(SessionEvent::Established(OwnerId::new("alice")))
                        .await
                        .unwrap(),
                );
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_reconcile_plan,
    bench_decode_fetch,
    bench_create,
    bench_sign_in,
);

criterion_main!(benches);
