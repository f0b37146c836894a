//! Latency of the adaptive rate controller's learn/read path under
//! concurrent keys, grounded on the corpus's `to_async` criterion
//! pattern for async services.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use muster_core::config::RuntimeConfig;
use muster_core::rate::{AdaptiveRateController, RateEvent};
use muster_store::AdaptiveStore;
use muster_test_utils::StateDirFixture;

fn controller(dir: &std::path::Path) -> AdaptiveRateController {
    AdaptiveRateController::new(AdaptiveStore::new(dir), RuntimeConfig::default())
}

async fn record_then_read(controller: &AdaptiveRateController, key: &str) {
    let limit = controller.record(key, RateEvent::Success).await.unwrap();
    black_box(limit);
    let effective = controller.effective_limit(key).await.unwrap();
    black_box(effective);
}

fn bench_record_then_read_single_key(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let dir = StateDirFixture::new();
    let controller = controller(dir.path());

    c.bench_function("rate_record_then_read_single_key", |b| {
        b.to_async(&runtime).iter(|| record_then_read(&controller, "anthropic:claude-opus"));
    });
}

fn bench_record_then_read_many_keys(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let dir = StateDirFixture::new();
    let controller = controller(dir.path());
    let keys: Vec<String> = (0..32).map(|i| format!("provider-{i}:model")).collect();

    let mut group = c.benchmark_group("rate_many_keys");
    group.bench_with_input(BenchmarkId::from_parameter(keys.len()), &keys, |b, keys| {
        b.to_async(&runtime).iter(|| async {
            for key in keys {
                record_then_read(&controller, key).await;
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_record_then_read_single_key, bench_record_then_read_many_keys);
criterion_main!(benches);
