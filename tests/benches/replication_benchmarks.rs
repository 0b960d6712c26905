//! # Replication Benchmarks
//!
//! | Path | Measured |
//! |------|----------|
//! | RAM store | write transaction of N clusters |
//! | Flusher | fenced durable flush of a change set |
//! | Snapshot | full-state encode and restore |

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mc_01_ram_store::{MemDb, Schema};
use mc_02_persistence::{Flusher, InMemoryDurableStore, StorageLoader};
use mesh_node::adapters::snapshot::{encode_snapshot, SnapshotRows};
use shared_types::{ChangeSet, Cluster, Entity, LbPolicy};

fn clusters(count: usize) -> Vec<Entity> {
    (0..count)
        .map(|i| {
            Entity::Cluster(Cluster {
                id: format!("c-{i}"),
                name: format!("cluster-{i}"),
                lb_policy: LbPolicy::RoundRobin,
                connect_timeout_ms: 250,
            })
        })
        .collect()
}

fn seeded_db(count: usize) -> Arc<MemDb> {
    let db = Arc::new(MemDb::new(Schema::mesh()).expect("schema"));
    let mut txn = db.begin(true);
    for row in clusters(count) {
        txn.insert(row).expect("insert");
    }
    txn.commit().expect("commit");
    db
}

fn bench_ram_store_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("ram-store");
    for size in [10, 100, 1000] {
        let rows = clusters(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("write_txn", size), &rows, |b, rows| {
            b.iter(|| {
                let db = MemDb::new(Schema::mesh()).expect("schema");
                let mut txn = db.begin(true);
                for row in rows {
                    txn.insert(row.clone()).expect("insert");
                }
                black_box(txn.commit().expect("commit"))
            })
        });
    }
    group.finish();
}

fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("flusher");
    for size in [10, 100, 1000] {
        let changes = ChangeSet::from_rows(clusters(size));
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("flush", size), &changes, |b, changes| {
            b.iter(|| {
                let flusher = Flusher::new(Arc::new(InMemoryDurableStore::new_master("bench")));
                black_box(flusher.flush(changes).expect("flush"))
            })
        });
    }
    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    let db = seeded_db(1000);
    let bytes = encode_snapshot(&db).expect("encode");

    group.bench_function("encode_1000", |b| {
        b.iter(|| black_box(encode_snapshot(&db).expect("encode")))
    });
    group.bench_function("restore_1000", |b| {
        b.iter(|| {
            let target = Arc::new(MemDb::new(Schema::mesh()).expect("schema"));
            let rows = SnapshotRows::decode(&bytes).expect("decode");
            black_box(
                StorageLoader::new(target)
                    .clear_and_load(&rows)
                    .expect("load"),
            )
        })
    });
    group.finish();
}

criterion_group!(benches, bench_ram_store_writes, bench_flush, bench_snapshot);
criterion_main!(benches);
