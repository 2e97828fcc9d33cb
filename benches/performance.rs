#![allow(missing_docs)]

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use ndarray::{ArrayD, IxDyn};
use std::hint::black_box;
use zanj::prelude::*;

#[derive(Clone, Debug, SerializableDataclass)]
struct BenchItem {
    id: u64,
    tags: Vec<String>,
}

#[derive(Clone, Debug, SerializableDataclass)]
struct BenchModel {
    name: String,
    weights: ArrayD<f32>,
    items: Vec<BenchItem>,
}

fn generate_data(side: usize, count: usize) -> BenchModel {
    BenchModel {
        name: "bench".into(),
        weights: ArrayD::from_shape_fn(IxDyn(&[side, side]), |ix| (ix[0] ^ ix[1]) as f32),
        items: (0..count)
            .map(|i| BenchItem {
                id: i as u64,
                tags: vec![format!("t{}", i % 7); 4],
            })
            .collect(),
    }
}

// --- BENCHMARKS ---

fn bench_writers(c: &mut Criterion) {
    let side = 512;
    let data = generate_data(side, 10_000);
    let dir = tempfile::tempdir().expect("Failed to create temp dir");

    let mut group = c.benchmark_group("Serialization Write");
    group.throughput(Throughput::Bytes((side * side * 4) as u64));

    // 1. Plain JSON tree, arrays inline as base64
    let inline = zanj::JsonSerializer::new(zanj::SerializerConfig {
        array_mode: zanj::ArrayMode::ArrayB64Meta,
        ..zanj::SerializerConfig::default()
    });
    group.bench_function("json_serialize_b64", |b| {
        b.iter(|| {
            inline
                .json_serialize(black_box(&data), &zanj::ObjectPath::root())
                .expect("Failed to serialize");
        });
    });

    // 2. Archive with externals
    let zanj = Zanj::default();
    group.bench_function("zanj_save", |b| {
        b.iter(|| {
            zanj.save(black_box(&data), dir.path().join("write"))
                .expect("Failed to save archive");
        });
    });

    // 3. Archive without compression
    let stored = Zanj::builder()
        .compression(zanj::ArchiveCompression::Stored)
        .build();
    group.bench_function("zanj_save_stored", |b| {
        b.iter(|| {
            stored
                .save(black_box(&data), dir.path().join("write_stored"))
                .expect("Failed to save archive");
        });
    });

    group.finish();
}

fn bench_readers(c: &mut Criterion) {
    let data = generate_data(512, 10_000);
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let zanj = Zanj::default();
    let path = zanj
        .save(&data, dir.path().join("read"))
        .expect("Failed to save archive");

    let mut group = c.benchmark_group("Deserialization Read");

    // 1. Eager read of the whole tree
    group.bench_function("zanj_read_all", |b| {
        b.iter(|| {
            let _res: BenchModel = zanj.read(&path).expect("Failed to read archive");
        });
    });

    // 2. Lazy open, one external entry
    group.bench_function("zanj_lazy_weights_only", |b| {
        b.iter(|| {
            let lazy = zanj.read_lazy(&path).expect("Failed to open archive");
            let weights: ArrayD<f32> = lazy
                .promise("weights.npy")
                .and_then(|p| p.load_as())
                .expect("Failed to load weights");
            black_box(weights);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_writers, bench_readers);
criterion_main!(benches);
