use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use notification_dedup::dedup::{
    DedupCapability, DedupStore, IdentityAttributes, IdentityHasher, InMemoryDedupStore,
    ManualClock, NotificationDeduplicator, RetryPolicy,
};
use notification_dedup::observability::LatencyTimer;

const NOW: i64 = 1_768_737_600;

fn sample_event(event_name: &str) -> serde_json::Value {
    json!({
        "eventSource": "iam.amazonaws.com",
        "eventName": event_name,
        "userIdentity": {
            "type": "AssumedRole",
            "arn": "arn:aws:sts::123456789012:assumed-role/deployer/session",
            "accountId": "123456789012"
        },
        "resources": [{ "type": "AWS::IAM::Role", "ARN": "arn:aws:iam::123456789012:role/app" }]
    })
}

fn benchmark_identity_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity");
    let hasher = IdentityHasher::new();

    group.bench_function("hash_attributes", |b| {
        let attributes = IdentityAttributes::new("IAMUser", "s3.amazonaws.com", "PutBucketPolicy")
            .with_principal_arn("arn:aws:iam::123456789012:user/alice")
            .with_account_id("123456789012");
        b.iter(|| black_box(hasher.hash(black_box(&attributes))));
    });

    group.bench_function("hash_event", |b| {
        let event = sample_event("AttachRolePolicy");
        b.iter(|| black_box(hasher.hash_event(black_box(&event))));
    });

    group.finish();
}

fn benchmark_memory_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_store");
    group.measurement_time(Duration::from_secs(5));

    let runtime = tokio::runtime::Runtime::new().expect("Failed to build runtime");

    for size in [100, 1_000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("exists_hit", size), size, |b, &size| {
            let store = InMemoryDedupStore::new(Arc::new(ManualClock::new(NOW)));
            let keys: Vec<String> = (0..size).map(|i| format!("hash-{:08}", i)).collect();
            runtime.block_on(async {
                for key in &keys {
                    store.put(key, NOW + 300).await.expect("put failed");
                }
            });

            let keys = &keys;
            let store = &store;
            let mut i = 0usize;
            b.to_async(&runtime).iter(move || {
                i = (i + 1) % keys.len();
                let key = &keys[i];
                async move { black_box(store.exists(key).await) }
            });
        });
    }

    group.bench_function("put_overwrite", |b| {
        let store = InMemoryDedupStore::new(Arc::new(ManualClock::new(NOW)));
        let store = &store;
        b.to_async(&runtime)
            .iter(move || async move { black_box(store.put("same-hash", NOW + 300).await) });
    });

    group.finish();
}

fn benchmark_deduplicator(c: &mut Criterion) {
    let mut group = c.benchmark_group("deduplicator");
    let runtime = tokio::runtime::Runtime::new().expect("Failed to build runtime");

    group.bench_function("process_event_suppressed", |b| {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = Arc::new(InMemoryDedupStore::new(clock.clone()));
        let dedup = NotificationDeduplicator::new(DedupCapability::enabled(store), 300)
            .with_clock(clock)
            .with_retry_policy(RetryPolicy::no_retry(Duration::from_millis(100)));
        let event = sample_event("CreateAccessKey");

        runtime.block_on(async {
            dedup
                .process_event(&event, || async { Ok(()) })
                .await
                .expect("first event failed");
        });

        let dedup = &dedup;
        let event = &event;
        b.to_async(&runtime).iter(move || async move {
            black_box(dedup.process_event(event, || async { Ok(()) }).await)
        });
    });

    group.finish();
}

fn benchmark_latency_timer(c: &mut Criterion) {
    c.bench_function("latency_timer", |b| {
        b.iter(|| {
            let timer = LatencyTimer::new();
            black_box(timer.elapsed_ms())
        });
    });
}

criterion_group!(
    benches,
    benchmark_identity_hashing,
    benchmark_memory_store,
    benchmark_deduplicator,
    benchmark_latency_timer,
);
criterion_main!(benches);
