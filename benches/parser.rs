//! Request parsing and response framing benchmarks
//!
//! Run with: cargo bench --bench parser

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use leanhttp::http::chunked::{decode_chunked, ChunkedWriter};
use leanhttp::http::{responses, RequestParser, Router, Version};
use leanhttp::http::{HttpRequest, Handler};
use std::io::{BufWriter, Write};

const SMALL_REQUEST: &[u8] = b"GET /hello/world?1=2 HTTP/1.1\r\nHost: localhost\r\n\r\n";

const BROWSER_REQUEST: &[u8] = b"GET /static/css/site.css?v=42 HTTP/1.1\r\n\
Host: www.example.com\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0\r\n\
Accept: text/css,*/*;q=0.1\r\n\
Accept-Language: en-US,en;q=0.5\r\n\
Accept-Encoding: gzip, deflate, br\r\n\
Referer: https://www.example.com/\r\n\
Cookie: session=0123456789abcdef; theme=dark\r\n\
Connection: keep-alive\r\n\
Cache-Control: max-age=0\r\n\r\n";

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    for (name, request) in [("small", SMALL_REQUEST), ("browser", BROWSER_REQUEST)] {
        group.throughput(Throughput::Bytes(request.len() as u64));

        group.bench_with_input(BenchmarkId::new("whole", name), request, |b, request| {
            b.iter(|| {
                let mut parser = RequestParser::new();
                parser.parse(black_box(request));
                black_box(parser.into_head());
            });
        });

        group.bench_with_input(BenchmarkId::new("fragmented", name), request, |b, request| {
            b.iter(|| {
                let mut parser = RequestParser::new();
                for piece in request.chunks(7) {
                    parser.parse(black_box(piece));
                    if parser.is_finished() {
                        break;
                    }
                }
                black_box(parser.into_head());
            });
        });
    }

    group.finish();
}

fn bench_route(c: &mut Criterion) {
    let mut router = Router::new();
    for i in 0..20 {
        router
            .get(&format!("/section{i}/<id:[0-9]+>"), |_: &mut HttpRequest<'_>| {
                Ok(Some(responses::ok("")))
            })
            .unwrap();
    }
    router
        .get("/users/<user>/posts/<post>", |request: &mut HttpRequest<'_>| {
            let post = request.param("post").get()?.to_string();
            Ok(Some(responses::ok(post)))
        })
        .unwrap();

    c.bench_function("route_last_of_21", |b| {
        b.iter(|| {
            let mut request = HttpRequest::new("GET", "/users/alice/posts/42");
            black_box(router.handle(&mut request).unwrap());
        });
    });
}

fn bench_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("response");

    group.bench_function("serialize_head", |b| {
        let mut response = responses::ok("Hello, world!");
        response.set_header("Content-Type", "text/plain").unwrap();
        response.add_header("Set-Cookie", "session=abc").unwrap();
        b.iter(|| black_box(response.head_bytes(Version::Http11)));
    });

    let body = vec![b'x'; 256 * 1024];
    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("chunked_256k", |b| {
        b.iter(|| {
            let mut chunked = ChunkedWriter::new(Vec::with_capacity(body.len() + 1024));
            {
                let mut out = BufWriter::with_capacity(8192, &mut chunked);
                out.write_all(black_box(&body)).unwrap();
                out.flush().unwrap();
            }
            chunked.finish().unwrap();
            black_box(chunked.into_inner());
        });
    });

    let encoded = leanhttp::http::chunked::encode_chunked(&body, 8192);
    group.bench_function("dechunk_256k", |b| {
        b.iter(|| black_box(decode_chunked(black_box(&encoded)).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_parse, bench_route, bench_response);
criterion_main!(benches);
