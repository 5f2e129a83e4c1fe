//! KEEL - Performance Benchmarks
//! Measures throughput of core engine operations using Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use keeldb::config::{Config, StoreOptions};
use keeldb::engine::keydir::{DirectoryEntry, KeyDirectory};
use keeldb::engine::store::Store;
use keeldb::engine::Keel;

fn filled_directory(n: usize) -> KeyDirectory {
    let mut dir = KeyDirectory::new();
    for i in 0..n {
        let key = format!("key_{:06}", i).into_bytes();
        dir.upsert(key, DirectoryEntry::default());
    }
    dir
}

fn bench_keydir_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("keydir");

    // Benchmark: Sorted inserts in reverse order (worst case shifting)
    group.bench_function("upsert_1000_reverse", |b| {
        b.iter(|| {
            let mut dir = KeyDirectory::new();
            for i in (0..1000).rev() {
                let key = format!("key_{:06}", i).into_bytes();
                dir.upsert(black_box(key), DirectoryEntry::default());
            }
        });
    });

    group.bench_function("find_key_hit", |b| {
        let dir = filled_directory(10_000);
        b.iter(|| {
            black_box(dir.find_key(Some(b"key_005000"), true)).ok();
        });
    });

    group.bench_function("find_key_miss", |b| {
        let dir = filled_directory(10_000);
        b.iter(|| {
            black_box(dir.find_key(Some(b"nonexistent_key"), false)).ok();
        });
    });

    group.bench_function("found_prefix_desc", |b| {
        let dir = filled_directory(10_000);
        b.iter(|| {
            black_box(dir.found_prefix(b"key_004", false));
        });
    });

    group.finish();
}

fn bench_store_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");

    group.bench_function("set_100", |b| {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("bench"), &StoreOptions::default()).unwrap();

        b.iter(|| {
            for i in 0..100 {
                let key = format!("key_{:06}", i);
                let value = format!("value_{:06}", i);
                store.set(black_box(key), black_box(value)).unwrap();
            }
        });
    });

    group.bench_function("get_hit", |b| {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("bench"), &StoreOptions::default()).unwrap();
        for i in 0..1000 {
            store
                .set(format!("key_{:06}", i), format!("value_{:06}", i))
                .unwrap();
        }
        b.iter(|| {
            black_box(store.get("key_000500").unwrap());
        });
    });

    group.bench_function("keys_page_of_50", |b| {
        let store = Store::in_memory();
        for i in 0..1000 {
            store.set(format!("key_{:06}", i), "v").unwrap();
        }
        b.iter(|| {
            black_box(store.keys(None, 50, 100, true).unwrap());
        });
    });

    group.finish();
}

fn bench_engine_e2e(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_e2e");

    for size in [100, 500, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::new("set_get_cycle", size),
            size,
            |b, &size| {
                b.iter(|| {
                    let dir = tempfile::tempdir().unwrap();
                    let config = Config::new(dir.path())
                        .with_eviction_interval(std::time::Duration::ZERO)
                        .with_sync_writes(false);
                    let keel = Keel::open(config).unwrap();

                    for i in 0..size {
                        keel.set(format!("key_{:06}", i), format!("value_{:06}", i))
                            .unwrap();
                    }

                    for i in 0..size {
                        black_box(keel.get(format!("key_{:06}", i)).unwrap());
                    }
                    keel.close().unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_keydir_operations,
    bench_store_operations,
    bench_engine_e2e
);
criterion_main!(benches);
