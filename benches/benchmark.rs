//! Benchmarks for kvcore performance.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kvcore::{
    ColumnFamilyOptions, DBIteratorBuilder, Database, IndexedWriteBatch, ReadOptions,
    StringAppendOperator, WriteBatch,
};
use tempfile::TempDir;

fn key(prefix: &str, i: usize) -> String {
    format!("{}{:08}", prefix, i)
}

/// Fresh database holding `count` keys named `prefix00000000...`.
fn populated(prefix: &str, count: usize) -> (TempDir, Arc<Database>) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path()).unwrap();
    let mut batch = WriteBatch::with_capacity(count);
    for i in 0..count {
        batch.put(key(prefix, i), format!("value{:08}", i));
    }
    db.write(&batch).unwrap();
    (dir, db)
}

/// Benchmark single puts, each its own batch.
fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_with_setup(
                || populated("unused", 0),
                |(_dir, db)| {
                    // Strided order so inserts do not arrive sorted.
                    for i in 0..size {
                        let k = key("put", (i * 7919) % size);
                        db.put(k.as_bytes(), b"value").unwrap();
                    }
                },
            );
        });
    }

    group.finish();
}

/// Benchmark atomic batches of increasing size.
fn bench_write_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_batch");

    for batch_size in [10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                b.iter_with_setup(
                    || populated("unused", 0),
                    |(_dir, db)| {
                        let mut batch = WriteBatch::with_capacity(batch_size);
                        for i in 0..batch_size {
                            batch.put(key("batch", i), "value");
                        }
                        db.write(&batch).unwrap();
                    },
                );
            },
        );
    }

    group.finish();
}

/// Benchmark point lookups one by one and through `multi_get`.
fn bench_point_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_reads");
    let (_dir, db) = populated("read", 10000);
    let keys: Vec<String> = (0..1000).map(|i| key("read", (i * 7919) % 10000)).collect();

    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("get_1000", |b| {
        b.iter(|| {
            for k in &keys {
                black_box(db.get(k.as_bytes()).unwrap());
            }
        });
    });
    group.bench_function("multi_get_1000", |b| {
        b.iter(|| black_box(db.multi_get(&keys).unwrap()));
    });

    group.finish();
}

/// Benchmark bounded scans and seeks.
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    let (_dir, db) = populated("scan", 10000);

    group.throughput(Throughput::Elements(1000));
    group.bench_function("range_1000", |b| {
        b.iter(|| {
            let iter = DBIteratorBuilder::new()
                .start(key("scan", 1000))
                .end(key("scan", 2000))
                .build(&db)
                .unwrap();
            black_box(iter.count())
        });
    });
    group.bench_function("seek_100", |b| {
        let mut iter = db.iter().unwrap();
        b.iter(|| {
            for i in (0..10000).step_by(100) {
                iter.seek(key("scan", i).as_bytes());
                black_box(iter.key());
            }
        });
    });

    group.finish();
}

/// Benchmark reads pinned to a snapshot while newer versions pile up.
fn bench_snapshot_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_read");
    let (_dir, db) = populated("snap", 1000);
    let snapshot = db.snapshot().unwrap();
    for version in 0..10 {
        let mut batch = WriteBatch::new();
        for i in 0..1000 {
            batch.put(key("snap", i), format!("v{}", version));
        }
        db.write(&batch).unwrap();
    }
    let options = ReadOptions::with_snapshot(&snapshot);

    group.throughput(Throughput::Elements(1000));
    group.bench_function("1000_keys_10_versions", |b| {
        b.iter(|| {
            for i in 0..1000 {
                black_box(db.get_opt(&options, key("snap", i).as_bytes()).unwrap());
            }
        });
    });

    group.finish();
}

/// Benchmark indexed batch lookups and the merged overlay scan.
fn bench_indexed_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("indexed_batch");
    let (_dir, db) = populated("ikey", 10000);
    let mut batch = IndexedWriteBatch::new();
    for i in (0..10000).step_by(10) {
        batch.put(key("ikey", i), "batch");
    }
    let options = ReadOptions::new();

    group.bench_function("get_from_batch_and_db", |b| {
        b.iter(|| {
            for i in (0..10000).step_by(7) {
                let k = key("ikey", i);
                black_box(
                    batch
                        .get_from_batch_and_db(&db, &options, k.as_bytes())
                        .unwrap(),
                );
            }
        });
    });
    group.bench_function("iter_with_base", |b| {
        b.iter(|| black_box(batch.iter_with_base(&db, &options).unwrap().count()));
    });

    group.finish();
}

/// Benchmark merge operands resolved at read time.
fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for operands in [1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::from_parameter(operands),
            &operands,
            |b, &operands| {
                let dir = TempDir::new().unwrap();
                let db = Database::open(dir.path()).unwrap();
                let cf = db
                    .create_column_family(
                        "log",
                        ColumnFamilyOptions::new()
                            .merge_operator(Arc::new(StringAppendOperator::new(","))),
                    )
                    .unwrap();
                for i in 0..operands {
                    db.merge_cf(&cf, b"k", i.to_string().as_bytes()).unwrap();
                }
                b.iter(|| black_box(db.get_cf(&cf, b"k").unwrap()));
            },
        );
    }

    group.finish();
}

/// Benchmark flushing the state into a fresh log.
fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush");

    for count in [100, 1000, 5000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_with_setup(|| populated("flush", count), |(_dir, db)| db.flush().unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_put,
    bench_write_batch,
    bench_point_reads,
    bench_scan,
    bench_snapshot_read,
    bench_indexed_batch,
    bench_merge,
    bench_flush,
);

criterion_main!(benches);
