//! Benchmarks for lock acquisition latency

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lock_manager::prelude::*;
use lock_manager::{ClusterLockConfig, ClusterLockService, MemoryCluster};

fn bench_memory_cluster(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();

    let cluster = MemoryCluster::new();
    let service = ClusterLockService::new(Arc::new(cluster.join()), ClusterLockConfig::default());
    let _peer = ClusterLockService::new(Arc::new(cluster.join()), ClusterLockConfig::default());
    let key = LockKey::named("bench", "1");

    let mut group = c.benchmark_group("memory_cluster");
    group.bench_function("write_unlock", |b| {
        b.to_async(&rt).iter(|| async {
            service
                .request_write_lock(black_box(&key), Some(Duration::ZERO), false)
                .await
                .unwrap();
            service.unlock(&key).await.unwrap();
        });
    });

    group.bench_function("read_unlock", |b| {
        b.to_async(&rt).iter(|| async {
            service
                .request_read_lock(black_box(&key), Some(Duration::ZERO), false)
                .await
                .unwrap();
            service.unlock(&key).await.unwrap();
        });
    });

    group.bench_function("write_convert_unlock", |b| {
        b.to_async(&rt).iter(|| async {
            service
                .request_write_lock(black_box(&key), Some(Duration::ZERO), false)
                .await
                .unwrap();
            service.convert_to_read_lock(&key, None).await.unwrap();
            service.unlock(&key).await.unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_memory_cluster);
criterion_main!(benches);
