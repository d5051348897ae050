//! Protocol encoding/decoding benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use uuid::Uuid;
use wirebus_codec::encode_message;
use wirebus_protocol::frame::Frame;
use wirebus_protocol::split::split_message;
use wirebus_protocol::{Message, SplitAccumulator, SPLIT_CHUNK_SIZE};

fn create_test_request(payload_size: usize) -> Message {
    Message::Request {
        client_name: "bench".to_string(),
        uuid: Uuid::new_v4(),
        command: "BlobService.put".to_string(),
        params: vec![serde_json::json!("x".repeat(payload_size))],
    }
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [100, 1000, 10000] {
        let payload = Bytes::from("x".repeat(size));
        let frame = Frame::new(payload.clone());

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for size in [100, 1000, 10000] {
        let payload = Bytes::from("x".repeat(size));
        let frame = Frame::new(payload);
        let encoded = frame.encode().unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut buf = encoded.clone();
                black_box(Frame::decode(&mut buf).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_split_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_message");

    for size in [1024 * 1024, 4 * 1024 * 1024, 16 * 1024 * 1024] {
        let text = "x".repeat(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &text, |b, text| {
            b.iter(|| black_box(split_message(text, SPLIT_CHUNK_SIZE).unwrap()));
        });
    }

    group.finish();
}

fn bench_accumulator_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulator_reassembly");

    for size in [1024 * 1024, 4 * 1024 * 1024] {
        let text = "x".repeat(size);
        let chunks = split_message(&text, SPLIT_CHUNK_SIZE).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &chunks, |b, chunks| {
            b.iter(|| {
                let mut acc = SplitAccumulator::new();
                let uuid = Uuid::new_v4();
                let full_size = text.len() as u64;
                let mut result = None;
                for (index, body) in chunks.iter().enumerate() {
                    let progress = acc
                        .push(uuid, full_size, index as u32, body.clone())
                        .unwrap();
                    if progress.is_completed() {
                        result = progress.full_text;
                    }
                }
                black_box(result)
            });
        });
    }

    group.finish();
}

fn bench_message_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_encode");

    // Below and above the split threshold.
    for size in [10_000, 1024 * 1024, 4 * 1024 * 1024] {
        let message = create_test_request(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &message, |b, message| {
            b.iter(|| black_box(encode_message(message).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_split_message,
    bench_accumulator_reassembly,
    bench_message_encode,
);
criterion_main!(benches);
