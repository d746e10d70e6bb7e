//! End-to-end request-parse throughput for [`parser::request::RequestParser`]
//! against a handful of representative request shapes.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parser::request::RequestParser;

const REQ_SHORT: &[u8] = b"\
GET /api/v1.0/weather/forecast HTTP/1.1\r\n\
Host: www.example.org\r\n\r\n";

const REQ_MED: &[u8] = b"\
GET /api/v1.0/weather/forecast HTTP/1.1\r\n\
Accept:*/*\r\n\
Accept-Encoding:gzip,deflate,br\r\n\
Accept-Language:en-US,en;q=0.5\r\n\
Cache-Control:no-cache\r\n\
Connection:keep-alive\r\n\
DNT:1\r\n\
Host: www.example.org\r\n\
Pragma:no-cache\r\n\
Referrer:https://www.example.org\r\n\
Sec-Fetch-Dest:empty\r\n\
Sec-Fetch-Mode:cors\r\n\
Sec-Fetch-Site:same-origin\r\n\
User-Agent:Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/109.0\r\n\r\n";

const REQ_POST: &[u8] =
    b"POST /2CGISQL.cgi HTTP/1.1\r\nHost: x\r\nContent-Length: 23\r\n\r\nuser=alice&password=pw!";

fn benchmark(c: &mut Criterion) {
    let inputs = [REQ_SHORT, REQ_MED, REQ_POST];

    let mut group = c.benchmark_group("parse_request");
    for &input in inputs.iter() {
        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_with_input(BenchmarkId::new("all", input.len()), input, |b, wire| {
            b.iter(|| {
                let mut buf = vec![0u8; 2048];
                buf[..wire.len()].copy_from_slice(wire);
                let mut scanned = 0;
                let mut line_start = 0;
                let mut req = RequestParser::new();
                let _ = req.parse(&mut buf, wire.len(), &mut scanned, &mut line_start);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
