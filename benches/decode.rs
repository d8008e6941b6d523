//! Benchmarks for the hot paths of a run.
//!
//! - v1 string decoding
//! - Parsing a smali file
//! - Scanning a decoder class

extern crate unparanoid;

use std::{hint::black_box, path::Path};

use criterion::{criterion_group, criterion_main, Criterion};
use unparanoid::{
    deobfuscation::{scan, scheme::v1, DecoderRegistry},
    smali::SmaliFile,
};

const ACCESSOR: &str =
    include_str!("../tests/samples/basic/io/michaelrocks/paranoid/Deobfuscator$app.smali");
const MAIN: &str = include_str!("../tests/samples/basic/com/example/Main.smali");

/// Decode "Hello" from a single six-unit chunk.
fn bench_decode_short(c: &mut Criterion) {
    let chunks = [[0xfffau16, 0xffb7, 0xff9a, 0xff93, 0xff93, 0xff90]];

    c.bench_function("decode_v1_short", |b| {
        b.iter(|| {
            let value = v1::decode(black_box(-0xffff_fff9), black_box(&chunks)).unwrap();
            black_box(value)
        });
    });
}

/// Advance the generator over a full chunk's worth of units.
fn bench_generator(c: &mut Criterion) {
    c.bench_function("v1_next_chunk", |b| {
        b.iter(|| {
            let mut state = v1::seed(black_box(0x1001));
            for _ in 0..v1::MAX_CHUNK_LENGTH {
                state = v1::next(state);
            }
            black_box(state)
        });
    });
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_main", |b| {
        b.iter(|| {
            let file = SmaliFile::parse(black_box(MAIN)).unwrap();
            black_box(file)
        });
    });
}

fn bench_scan_accessor(c: &mut Criterion) {
    let file = SmaliFile::parse(ACCESSOR).unwrap();
    let registry = DecoderRegistry::new();

    c.bench_function("scan_accessor", |b| {
        b.iter(|| {
            let out = scan(black_box(&file), Path::new("Deobfuscator$app.smali"), &registry);
            black_box(out)
        });
    });
}

criterion_group!(
    benches,
    bench_decode_short,
    bench_generator,
    bench_parse,
    bench_scan_accessor
);
criterion_main!(benches);
