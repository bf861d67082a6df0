//! Canonical CBOR and JSON benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docsync_bench::{nested_body, random_data};
use docsync_codec::{from_cbor, parse_json, to_canonical_cbor, to_json, Value};

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for (depth, width) in [(1, 8), (2, 8), (3, 8)] {
        let value = nested_body(depth, width);
        let size = to_canonical_cbor(&value).map(|b| b.len()).unwrap_or(0);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::new("nested", format!("{depth}x{width}")),
            &value,
            |b, value| b.iter(|| black_box(to_canonical_cbor(black_box(value)).unwrap())),
        );
    }

    group.bench_function("bytes_4k", |b| {
        let value = Value::Bytes(random_data(4096));
        b.iter(|| black_box(to_canonical_cbor(black_box(&value)).unwrap()));
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for (depth, width) in [(1, 8), (2, 8), (3, 8)] {
        let bytes = to_canonical_cbor(&nested_body(depth, width)).unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("nested", format!("{depth}x{width}")),
            &bytes,
            |b, bytes| b.iter(|| black_box(from_cbor(black_box(bytes)).unwrap())),
        );
    }

    group.finish();
}

fn bench_json(c: &mut Criterion) {
    let mut group = c.benchmark_group("json");
    let value = nested_body(2, 8);
    let text = to_json(&value).unwrap().to_string();

    group.bench_function("to_json", |b| {
        b.iter(|| black_box(to_json(black_box(&value)).unwrap()));
    });
    group.bench_function("parse_json", |b| {
        b.iter(|| black_box(parse_json(black_box(&text)).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_json);
criterion_main!(benches);
