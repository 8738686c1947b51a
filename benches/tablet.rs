// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Benchmarks for the tablet write and read paths.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tabletkv::storage::{Key, KeyRange, OpId};
use tabletkv::tablet::{
    ColumnSchema, ReadOptions, Schema, Tablet, TabletMetadata, TabletOptions, WriteRequest,
};
use tabletkv::time::HybridClock;
use tempfile::TempDir;

fn create_test_tablet() -> (Tablet, TempDir) {
    let dir = TempDir::new().unwrap();
    let schema = Schema::new(1, vec![ColumnSchema::key("id"), ColumnSchema::value("v")]).unwrap();
    let metadata = TabletMetadata::new("bench", "bench", dir.path(), schema);
    let tablet: Tablet = Tablet::new(metadata, TabletOptions::default(), Arc::new(HybridClock::default()));
    tablet.open().unwrap();
    tablet.mark_finished_bootstrapping().unwrap();
    (tablet, dir)
}

fn populate(tablet: &Tablet, op_index: &AtomicI64) {
    for chunk in 0..100 {
        let request = (0..100).fold(WriteRequest::new(1), |request, i| {
            request.put(format!("key{:05}", chunk * 100 + i), vec![0u8; 100])
        });
        let index = op_index.fetch_add(1, Ordering::Relaxed);
        tablet.write(request, OpId::new(1, index)).unwrap();
    }
}

fn bench_point_write(c: &mut Criterion) {
    let (tablet, _dir) = create_test_tablet();
    let op_index = AtomicI64::new(1);

    let mut group = c.benchmark_group("tablet");
    group.throughput(Throughput::Elements(1));

    group.bench_function("point_write", |b| {
        b.iter(|| {
            let i = op_index.fetch_add(1, Ordering::Relaxed);
            let request = WriteRequest::new(1).put(format!("key{}", i), vec![0u8; 100]);
            black_box(tablet.write(request, OpId::new(1, i)).unwrap())
        })
    });

    group.finish();
}

fn bench_point_read(c: &mut Criterion) {
    let (tablet, _dir) = create_test_tablet();
    populate(&tablet, &AtomicI64::new(1));

    let mut group = c.benchmark_group("tablet");
    group.throughput(Throughput::Elements(1));

    group.bench_function("point_read", |b| {
        b.iter_batched(
            || Key::from(format!("key{:05}", rand::random::<u32>() % 10000)),
            |key| black_box(tablet.read_row(&key, None).unwrap()),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let (tablet, _dir) = create_test_tablet();
    populate(&tablet, &AtomicI64::new(1));

    let mut group = c.benchmark_group("tablet");
    group.throughput(Throughput::Elements(100));

    group.bench_function("scan_100", |b| {
        b.iter_batched(
            || {
                let start = rand::random::<u32>() % 9900;
                KeyRange::new(format!("key{:05}", start), format!("key{:05}", start + 100)).unwrap()
            },
            |range| {
                let rows = tablet
                    .collect_rows(ReadOptions::default().ordered().with_range(range))
                    .unwrap();
                black_box(rows)
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_point_write, bench_point_read, bench_scan);
criterion_main!(benches);
