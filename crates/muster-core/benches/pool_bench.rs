//! Throughput of the bounded-concurrency worker pool under increasing
//! fan-out, grounded on the corpus's `to_async` criterion pattern for
//! async services.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio_util::sync::CancellationToken;

use muster_core::pool::{run_pool, PoolOptions};

async fn run_noop_items(n: usize, concurrency: usize) {
    let items: Vec<usize> = (0..n).collect();
    let result = run_pool(
        items,
        concurrency,
        |_index, item, _cancel| async move { Ok::<usize, anyhow::Error>(item) },
        |_, _| 1,
        PoolOptions { cancel: CancellationToken::new(), ..PoolOptions::default() },
    )
    .await
    .unwrap();
    black_box(result);
}

fn bench_pool_fanout(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("pool_fanout");

    for &n in &[8usize, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.to_async(&runtime).iter(|| run_noop_items(n, 8));
        });
    }

    group.finish();
}

fn bench_pool_concurrency_limits(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("pool_concurrency");

    for &concurrency in &[1usize, 4, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(concurrency), &concurrency, |b, &concurrency| {
            b.to_async(&runtime).iter(|| run_noop_items(128, concurrency));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pool_fanout, bench_pool_concurrency_limits);
criterion_main!(benches);
