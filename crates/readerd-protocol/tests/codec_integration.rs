//! Integration tests for ReaderCodec over Tokio streams.
//!
//! These verify framing across real async I/O and that arbitrary TCP
//! segmentation does not change what the decoder yields.

use bytes::BytesMut;
use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use proptest::prelude::*;
use readerd_core::{AntennaId, TagEvent, TagId};
use readerd_protocol::{LlrpStatus, Message, MessageBody, ReaderCodec, ReaderEvent};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::codec::{Decoder, Encoder, Framed, FramedRead};

fn create_framed_duplex(
    buffer_size: usize,
) -> (
    Framed<DuplexStream, ReaderCodec>,
    Framed<DuplexStream, ReaderCodec>,
) {
    let (client, server) = tokio::io::duplex(buffer_size);
    (
        Framed::new(client, ReaderCodec::new()),
        Framed::new(server, ReaderCodec::new()),
    )
}

fn report(count: usize) -> Message {
    let ts = Utc.with_ymd_and_hms(2025, 10, 16, 9, 0, 0).unwrap();
    let tags = (0..count)
        .map(|i| {
            TagEvent::new(
                TagId::new(vec![0xE2, 0x80, i as u8]).unwrap(),
                AntennaId::new((i % 4) as u16 + 1),
                ts,
            )
            .with_rssi(-40 - i as i16)
        })
        .collect();
    Message::new(100, MessageBody::RoAccessReport(tags))
}

#[tokio::test]
async fn test_command_and_response_exchange() {
    let (mut client, mut server) = create_framed_duplex(1024);

    client
        .send(Message::new(7, MessageBody::StartRospec { rospec_id: 1 }))
        .await
        .unwrap();

    let request = server.next().await.unwrap().unwrap();
    assert_eq!(request.id, 7);
    assert_eq!(request.body, MessageBody::StartRospec { rospec_id: 1 });

    server
        .send(Message::new(
            request.id,
            MessageBody::StartRospecResponse(LlrpStatus::success()),
        ))
        .await
        .unwrap();

    let response = client.next().await.unwrap().unwrap();
    assert_eq!(response.id, 7);
    assert!(response.body.status().unwrap().is_success());
}

#[tokio::test]
async fn test_large_report_through_small_pipe() {
    // 64 byte pipe forces the report to arrive in many reads
    let (mut client, mut server) = create_framed_duplex(64);
    let sent = report(40);

    let expected = sent.clone();
    let writer = tokio::spawn(async move {
        server.send(sent).await.unwrap();
        server
    });

    let received = client.next().await.unwrap().unwrap();
    assert_eq!(received, expected);
    writer.await.unwrap();
}

#[tokio::test]
async fn test_notifications_interleaved_with_reports() {
    let (mut client, mut server) = create_framed_duplex(4096);

    server
        .send(Message::new(
            0,
            MessageBody::ReaderEventNotification(ReaderEvent::ConnectionAttempt { status: 0 }),
        ))
        .await
        .unwrap();
    server.send(report(2)).await.unwrap();
    server.send(Message::new(3, MessageBody::Keepalive)).await.unwrap();

    let mut kinds = Vec::new();
    for _ in 0..3 {
        kinds.push(client.next().await.unwrap().unwrap().body.type_code());
    }

    assert_eq!(kinds, vec![63, 61, 62]);
}

#[tokio::test]
async fn test_stream_ends_cleanly_on_close() {
    let (client, mut server) = tokio::io::duplex(256);
    let mut framed = FramedRead::new(client, ReaderCodec::new());

    let mut buf = BytesMut::new();
    ReaderCodec::new()
        .encode(Message::new(1, MessageBody::KeepaliveAck), &mut buf)
        .unwrap();
    server.write_all(&buf).await.unwrap();
    drop(server);

    assert_eq!(
        framed.next().await.unwrap().unwrap().body,
        MessageBody::KeepaliveAck
    );
    assert!(framed.next().await.is_none());
}

proptest! {
    /// Splitting the byte stream at arbitrary points yields the same messages.
    #[test]
    fn prop_segmentation_does_not_change_decoding(
        cuts in prop::collection::vec(1usize..40, 1..20),
        tag_count in 0usize..10,
    ) {
        let messages = vec![
            Message::new(1, MessageBody::StopRospec { rospec_id: 3 }),
            report(tag_count),
            Message::new(2, MessageBody::StopRospecResponse(LlrpStatus::error(5, "not running"))),
        ];

        let mut wire = BytesMut::new();
        let mut codec = ReaderCodec::new();
        for message in &messages {
            codec.encode(message.clone(), &mut wire).unwrap();
        }

        let mut decoder = ReaderCodec::new();
        let mut pending = BytesMut::new();
        let mut decoded = Vec::new();
        let mut offset = 0;
        for cut in cuts.iter().cycle() {
            if offset >= wire.len() {
                break;
            }
            let end = (offset + cut).min(wire.len());
            pending.extend_from_slice(&wire[offset..end]);
            offset = end;
            while let Some(message) = decoder.decode(&mut pending).unwrap() {
                decoded.push(message);
            }
        }

        prop_assert_eq!(decoded, messages);
        prop_assert!(pending.is_empty());
    }
}
