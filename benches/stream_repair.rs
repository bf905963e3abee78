//! Benchmarks for stream decoding and JSON repair
//!
//! This benchmark measures:
//! - repair of well-formed payloads (fast path)
//! - repair of damaged payloads (full step sequence)
//! - decoding a chunked event stream end to end

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use llm_relay::pipeline::{repair_json, StreamRepairParser};

const WELL_FORMED: &str = concat!(
    r#"{"id":"chatcmpl-123","object":"chat.completion.chunk","created":1694268190,"#,
    r#""model":"mistral-large-latest","#,
    r#""choices":[{"index":0,"delta":{"content":"Hello there"},"finish_reason":null}]}"#,
);

const DAMAGED: &str = concat!(
    "{id: chatcmpl-123, object: chat.completion.chunk, ",
    "choices: [{index: 0, delta: {content: Hello there}, finish_reason: NULL",
);

fn stream_body(frames: usize) -> String {
    let mut body = String::new();
    for i in 0..frames {
        body.push_str(&format!(
            "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"token {} \"}}}}]}}\n\n",
            i
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn bench_repair(c: &mut Criterion) {
    let mut group = c.benchmark_group("repair_json");

    group.throughput(Throughput::Bytes(WELL_FORMED.len() as u64));
    group.bench_function("well_formed", |b| {
        b.iter(|| repair_json(black_box(WELL_FORMED)))
    });

    group.throughput(Throughput::Bytes(DAMAGED.len() as u64));
    group.bench_function("damaged", |b| b.iter(|| repair_json(black_box(DAMAGED))));

    group.finish();
}

fn bench_stream_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_decode");
    let body = stream_body(500);
    group.throughput(Throughput::Bytes(body.len() as u64));

    // Transport reads rarely align with events; feed 61-byte slices.
    group.bench_function("chunked_500_frames", |b| {
        b.iter(|| {
            let mut parser = StreamRepairParser::new();
            let mut events = 0usize;
            for chunk in body.as_bytes().chunks(61) {
                events += parser.push(black_box(chunk)).len();
            }
            events
        })
    });

    group.finish();
}

criterion_group!(benches, bench_repair, bench_stream_decode);
criterion_main!(benches);
