//! Per-token version-parse cost for [`parser::version::Version::parse`].

use std::str::from_utf8;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use parser::Version;

const VERSIONS: [&[u8]; 4] = [b"HTTP/1.1", b"HTTP/1.0", b"HTTP/2", b"HTTP/3"];

fn benchmark(c: &mut Criterion) {
    for version in VERSIONS {
        c.bench_with_input(
            BenchmarkId::new("version", from_utf8(version).unwrap()),
            black_box(&version),
            |b, i| b.iter(|| Version::parse(i)),
        );
    }
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
