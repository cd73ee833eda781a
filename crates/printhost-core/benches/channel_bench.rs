//! Criterion benchmarks for the virtual serial channel decoder.
//!
//! The bridge decodes every line the print server writes, and during a print
//! that is several hundred G-code lines per second, so decoding must stay far
//! below a microsecond per line.
//!
//! Run with:
//! ```bash
//! cargo bench --package printhost-core --bench channel_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use printhost_core::protocol::channel::{decode_line, decode_packet};
use printhost_core::{FrameDecoder, Framing};

fn gcode_stream(lines: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..lines {
        out.extend_from_slice(format!("N{i} G1 X{}.{} Y{} E0.0421*77\n", i % 200, i % 10, i % 150).as_bytes());
    }
    out
}

fn bench_decode_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_line");
    group.bench_function("data", |b| {
        b.iter(|| decode_line(black_box(b"N1234 G1 X10.5 Y20.25 E0.0421*77")))
    });
    group.bench_function("baudrate", |b| {
        b.iter(|| decode_line(black_box(b"!octo4a: BAUDRATE 250000")))
    });
    group.bench_function("packet", |b| {
        b.iter(|| decode_packet(black_box(b"\x00N1234 G1 X10.5 Y20.25*77\n")))
    });
    group.finish();
}

fn bench_frame_decoder(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decoder");
    for chunk in [64usize, 512, 4096] {
        let stream = gcode_stream(1_000);
        group.bench_with_input(BenchmarkId::new("lines", chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new(Framing::Lines);
                let mut count = 0usize;
                for piece in stream.chunks(chunk) {
                    count += decoder.feed(black_box(piece)).len();
                }
                count
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode_line, bench_frame_decoder);
criterion_main!(benches);
