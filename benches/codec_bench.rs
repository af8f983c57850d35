//! Throughput of ReaderCodec on tag reports.
//!
//! Tag reports dominate the traffic during inventory, so the benchmarks
//! scale with the number of reads per report.
//!
//! ```sh
//! cargo bench -p readerd-protocol --bench codec_bench
//! ```

use bytes::BytesMut;
use chrono::{TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use readerd_core::{AntennaId, TagEvent, TagId};
use readerd_protocol::{LlrpStatus, Message, MessageBody, ReaderCodec};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

const REPORT_SIZES: [usize; 3] = [1, 50, 500];

fn report(tags: usize) -> Message {
    let ts = Utc.with_ymd_and_hms(2025, 10, 16, 9, 0, 0).unwrap();
    let reads = (0..tags)
        .map(|i| {
            let epc = [0xE2, 0x80, 0x11, 0x60, (i >> 8) as u8, i as u8];
            TagEvent::new(TagId::new(epc.to_vec()).unwrap(), AntennaId::new(1), ts)
                .with_rssi(-55)
                .with_channel(7)
        })
        .collect();
    Message::new(1, MessageBody::RoAccessReport(reads))
}

fn encoded(message: Message) -> BytesMut {
    let mut buffer = BytesMut::new();
    ReaderCodec::new().encode(message, &mut buffer).unwrap();
    buffer
}

fn bench_encode_report(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_report");

    for tags in REPORT_SIZES {
        group.throughput(Throughput::Elements(tags as u64));
        let msg = report(tags);

        group.bench_with_input(BenchmarkId::from_parameter(tags), &msg, |b, msg| {
            b.iter(|| {
                let mut buffer = BytesMut::new();
                ReaderCodec::new()
                    .encode(black_box(msg.clone()), &mut buffer)
                    .unwrap();
                black_box(buffer);
            });
        });
    }

    group.finish();
}

fn bench_decode_report(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_report");

    for tags in REPORT_SIZES {
        group.throughput(Throughput::Elements(tags as u64));
        let bytes = encoded(report(tags)).freeze();

        group.bench_with_input(BenchmarkId::from_parameter(tags), &bytes, |b, bytes| {
            b.iter(|| {
                let mut buffer = BytesMut::from(&bytes[..]);
                let msg = ReaderCodec::new().decode(&mut buffer).unwrap();
                black_box(msg);
            });
        });
    }

    group.finish();
}

/// A stop acknowledgement queued behind a burst of reports, the shape of
/// traffic at the end of an inventory window.
fn bench_decode_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_stream");

    let mut stream = BytesMut::new();
    for _ in 0..20 {
        stream.extend_from_slice(&encoded(report(50)));
    }
    stream.extend_from_slice(&encoded(Message::new(
        2,
        MessageBody::StopRospecResponse(LlrpStatus::success()),
    )));
    let stream = stream.freeze();
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("twenty_reports_then_ack", |b| {
        b.iter(|| {
            let mut codec = ReaderCodec::new();
            let mut buffer = BytesMut::from(&stream[..]);
            let mut frames = 0;
            while let Some(msg) = codec.decode(&mut buffer).unwrap() {
                black_box(msg);
                frames += 1;
            }
            assert_eq!(frames, 21);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_report,
    bench_decode_report,
    bench_decode_stream
);
criterion_main!(benches);
