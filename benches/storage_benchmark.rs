// Benchmarks for key derivation and the cache-aside read path.
// Run with: cargo bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::hint::black_box;
use storage_kit::{CacheKeyBuilder, Params, Storage};

fn params(count: usize) -> Params {
    (0..count)
        .map(|i| (format!("param_{}", i), json!(format!("value-number-{}-with-padding", i))))
        .collect()
}

fn bench_cache_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_key");
    for count in [1usize, 4, 16] {
        let p = params(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &p, |b, p| {
            b.iter(|| black_box(CacheKeyBuilder::build("users", p)));
        });
    }
    group.finish();
}

fn bench_cache_aside_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let storage = Storage::new();
    let p = params(2);

    rt.block_on(async {
        storage
            .init(
                json!({
                    "driver": "memory",
                    "connection": {"results": {"SELECT * FROM users": [{"id": 1}]}},
                    "cache": {"driver": "memory"}
                }),
                json!({"users": {"sql": "SELECT * FROM users", "caching": true}}),
            )
            .await
            .expect("init");
        storage.reload_from_db_to_cache("users", &p).await.expect("warm");
    });

    c.bench_function("cache_aside_hit", |b| {
        b.iter(|| black_box(rt.block_on(storage.get_data("users", &p))));
    });
}

fn bench_database_read(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let storage = Storage::new();
    let p = params(2);

    rt.block_on(async {
        storage
            .init(
                json!({
                    "driver": "memory",
                    "connection": {"results": {"SELECT * FROM users": [{"id": 1}]}}
                }),
                json!({"users": {"sql": "SELECT * FROM users"}}),
            )
            .await
            .expect("init");
    });

    c.bench_function("database_read", |b| {
        b.iter(|| black_box(rt.block_on(storage.get_from_db("users", &p))));
    });
}

criterion_group!(benches, bench_cache_key, bench_cache_aside_hit, bench_database_read);
criterion_main!(benches);
