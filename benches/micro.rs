//! Micro-benchmarks: point operations per backend and through the
//! LSM write/read paths.

use criterion::{Criterion, criterion_group, criterion_main};
use tempfile::TempDir;

use concordkv::config::LsmConfig;
use concordkv::engine::{BPlusTreeEngine, HashEngine, OrderedEngine, StorageEngine};
use concordkv::lsm::LsmTree;

fn bench_lsm_put(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let tree = LsmTree::open(
        tmp.path(),
        LsmConfig {
            memtable_max_size: 64 * 1024 * 1024,
            sync_writes: false,
            ..LsmConfig::default()
        },
    )
    .unwrap();

    let mut i = 0u64;
    c.bench_function("lsm_put_64b", |b| {
        b.iter(|| {
            let key = format!("bench-key-{i:016}");
            tree.put(key.as_bytes(), &[0u8; 64]).unwrap();
            i += 1;
        })
    });
}

fn bench_lsm_get(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let tree = LsmTree::open(tmp.path(), LsmConfig::default()).unwrap();
    for i in 0..10_000u64 {
        let key = format!("bench-key-{i:016}");
        tree.put(key.as_bytes(), &[0u8; 64]).unwrap();
    }
    tree.flush().unwrap();

    let mut i = 0u64;
    c.bench_function("lsm_get_flushed", |b| {
        b.iter(|| {
            let key = format!("bench-key-{:016}", i % 10_000);
            tree.get(key.as_bytes()).unwrap();
            i += 1;
        })
    });
}

fn bench_memory_engines(c: &mut Criterion) {
    let ordered = OrderedEngine::new();
    let hash = HashEngine::new();
    let btree = BPlusTreeEngine::new();
    for i in 0..10_000u64 {
        let key = format!("bench-key-{i:016}");
        ordered.put(key.as_bytes(), &[0u8; 64]).unwrap();
        hash.put(key.as_bytes(), &[0u8; 64]).unwrap();
        btree.put(key.as_bytes(), &[0u8; 64]).unwrap();
    }

    let mut i = 0u64;
    c.bench_function("ordered_get", |b| {
        b.iter(|| {
            let key = format!("bench-key-{:016}", i % 10_000);
            ordered.get(key.as_bytes()).unwrap();
            i += 1;
        })
    });
    c.bench_function("hash_get", |b| {
        b.iter(|| {
            let key = format!("bench-key-{:016}", i % 10_000);
            hash.get(key.as_bytes()).unwrap();
            i += 1;
        })
    });
    c.bench_function("btree_get", |b| {
        b.iter(|| {
            let key = format!("bench-key-{:016}", i % 10_000);
            btree.get(key.as_bytes()).unwrap();
            i += 1;
        })
    });
}

criterion_group!(benches, bench_lsm_put, bench_lsm_get, bench_memory_engines);
criterion_main!(benches);
