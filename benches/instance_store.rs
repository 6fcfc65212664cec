//! Benchmark for the sharded instance store
//!
//! Target: 10K heartbeats/sec on a single core

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use service_registry::domain::Clause;
use service_registry::{Instance, InstanceKey, LookupFilter, MemoryStore, Metadata, Mode, Predicate};
use std::sync::Arc;

fn instance(service: usize, id: usize) -> Instance {
    Instance {
        service_name: format!("service-{:02}", service),
        id: format!("instance-{:04}", id),
        host: format!("10.0.{}.{}", service, id % 250),
        port: 8080,
        mode: if id % 2 == 0 { Mode::Prod } else { Mode::Staging },
        metadata: Metadata {
            environment: Mode::Prod,
            region: if id % 3 == 0 { "us-east".into() } else { "eu-west".into() },
            version: (id % 5) as u32,
            developer: None,
            experimental: Some(id % 7 == 0),
        },
        health: String::new(),
        last_heartbeat: Default::default(),
    }
}

fn populated_store() -> MemoryStore {
    let store = MemoryStore::new();
    let now = Utc::now();
    for service in 0..10 {
        for id in 0..100 {
            store.upsert_sync(instance(service, id), now);
        }
    }
    store
}

fn bench_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("instance_store");
    group.throughput(Throughput::Elements(1));

    group.bench_function("upsert_new_instance", |b| {
        let store = MemoryStore::new();
        let mut counter = 0usize;

        b.iter(|| {
            counter += 1;
            store.upsert_sync(black_box(instance(counter % 10, counter)), Utc::now());
        });
    });

    group.finish();
}

fn bench_heartbeat(c: &mut Criterion) {
    let mut group = c.benchmark_group("instance_store");
    group.throughput(Throughput::Elements(1));

    let store = populated_store();
    let keys: Vec<InstanceKey> = (0..1000)
        .map(|i| instance(i % 10, i % 100).key())
        .collect();

    group.bench_function("touch_heartbeat", |b| {
        let mut counter = 0usize;
        b.iter(|| {
            counter += 1;
            let _ = store.touch_sync(black_box(&keys[counter % keys.len()]), Utc::now());
        });
    });

    group.finish();
}

fn bench_concurrent_heartbeats(c: &mut Criterion) {
    let mut group = c.benchmark_group("instance_store");
    group.throughput(Throughput::Elements(100));

    let store = Arc::new(populated_store());
    let rt = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("concurrent_100_heartbeats", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::new();
                for i in 0..100 {
                    let store = store.clone();
                    handles.push(tokio::spawn(async move {
                        let key = instance(i % 10, i).key();
                        let _ = store.touch_sync(&key, Utc::now());
                    }));
                }
                for handle in handles {
                    let _ = handle.await;
                }
            });
        });
    });

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    group.throughput(Throughput::Elements(1));

    let store = populated_store();
    let now = Utc::now();
    let ttl = chrono::Duration::seconds(30);

    group.bench_function("service_and_region", |b| {
        let predicate = LookupFilter::service("service-03")
            .with_metadata("region", "us-east")
            .alive_only(true)
            .to_predicate(now, ttl);
        b.iter(|| black_box(store.query_sync(black_box(&predicate))));
    });

    group.bench_function("metadata_only", |b| {
        let predicate = Predicate::all()
            .and(Clause::Metadata {
                key: "version".into(),
                value: "3".into(),
            })
            .and(Clause::Mode("prod".into()));
        b.iter(|| black_box(store.query_sync(black_box(&predicate))));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_upsert,
    bench_heartbeat,
    bench_concurrent_heartbeats,
    bench_query
);
criterion_main!(benches);
