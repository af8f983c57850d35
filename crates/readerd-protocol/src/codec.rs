//! Tokio codec for reader protocol framing.
//!
//! The `ReaderCodec` implements [`Decoder`] and [`Encoder<Message>`] so that a
//! `TcpStream` can be wrapped in `tokio_util::codec::Framed`:
//!
//! ```text
//! TCP Stream -> Decoder -> Message
//! Message -> Encoder -> TCP Stream (header + body)
//! ```
//!
//! ```rust,no_run
//! use futures::{SinkExt, StreamExt};
//! use readerd_protocol::{Message, MessageBody, ReaderCodec};
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//!
//! # async fn example() -> readerd_core::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:5084").await?;
//! let mut framed = Framed::new(stream, ReaderCodec::new());
//!
//! framed.send(Message::new(1, MessageBody::StartRospec { rospec_id: 1 })).await?;
//! if let Some(Ok(response)) = framed.next().await {
//!     println!("Received: {:?}", response);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # DoS Protection
//!
//! The header announces the frame length up front, so an oversized frame is
//! rejected before any of its body is buffered.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::{FrameHeader, Message, MessageBody};
use readerd_core::constants::{HEADER_LEN, MAX_FRAME_SIZE};
use readerd_core::{Error, Result};

/// Tokio codec for reader messages.
#[derive(Debug, Clone)]
pub struct ReaderCodec {
    /// Frames longer than this are rejected in both directions.
    max_frame_size: usize,
}

impl ReaderCodec {
    /// Create a codec with the default 64 KB frame limit.
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom frame limit.
    ///
    /// ```
    /// use readerd_protocol::ReaderCodec;
    ///
    /// let codec = ReaderCodec::with_max_frame_size(128 * 1024);
    /// assert_eq!(codec.max_frame_size(), 128 * 1024);
    /// ```
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for ReaderCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ReaderCodec {
    type Item = Message;
    type Error = Error;

    /// Decode one message from `src`.
    ///
    /// Returns `Ok(None)` until a whole frame is buffered. Bytes of
    /// following frames stay in `src` for the next call.
    ///
    /// Only header errors are returned as `Err`; they leave the stream
    /// unsynchronised. A delimited frame whose body fails to parse comes
    /// back as [`MessageBody::Malformed`].
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(header) = FrameHeader::peek(&src[..])? else {
            return Ok(None);
        };

        let length = header.length as usize;
        if length > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: length,
                max_size: self.max_frame_size,
            });
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        let body = frame.split_off(HEADER_LEN).freeze();

        let message = Message::decode(header.message_type, header.message_id, body.clone())
            .unwrap_or_else(|e| {
                Message::new(
                    header.message_id,
                    MessageBody::Malformed {
                        message_type: header.message_type,
                        reason: e.to_string(),
                        payload: body,
                    },
                )
            });
        Ok(Some(message))
    }
}

impl Encoder<Message> for ReaderCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let mut body = BytesMut::new();
        item.encode_body(&mut body)?;

        let size = HEADER_LEN + body.len();
        if size > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size,
                max_size: self.max_frame_size,
            });
        }

        dst.reserve(size);
        FrameHeader::new(item.body.type_code(), body.len(), item.id).write(dst);
        dst.extend_from_slice(&body);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LlrpStatus;

    fn encoded(message: Message) -> BytesMut {
        let mut buf = BytesMut::new();
        ReaderCodec::new().encode(message, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_codec_default() {
        assert_eq!(ReaderCodec::default().max_frame_size(), MAX_FRAME_SIZE);
    }

    #[test]
    fn test_encode_start_rospec() {
        let buf = encoded(Message::new(5, MessageBody::StartRospec { rospec_id: 1 }));
        assert_eq!(
            &buf[..],
            &[0x04, 0x16, 0, 0, 0, 14, 0, 0, 0, 5, 0, 0, 0, 1]
        );
    }

    #[test]
    fn test_decode_partial_header() {
        let mut codec = ReaderCodec::new();
        let mut buffer = BytesMut::from(&[0x04, 0x16, 0][..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_decode_partial_body() {
        let mut codec = ReaderCodec::new();
        let full = encoded(Message::new(5, MessageBody::StopRospec { rospec_id: 9 }));

        let mut buffer = BytesMut::from(&full[..full.len() - 2]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(&full[full.len() - 2..]);
        let msg = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(msg.body, MessageBody::StopRospec { rospec_id: 9 });
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_multiple_messages_in_buffer() {
        let mut codec = ReaderCodec::new();
        let mut buffer = encoded(Message::new(1, MessageBody::Keepalive));
        buffer.extend_from_slice(&encoded(Message::new(
            2,
            MessageBody::StartRospecResponse(LlrpStatus::success()),
        )));

        let first = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(first.body, MessageBody::Keepalive);

        let second = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(second.id, 2);
        assert!(second.body.status().unwrap().is_success());

        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_malformed_body_does_not_desync_stream() {
        let mut codec = ReaderCodec::new();
        // READER_EVENT_NOTIFICATION with event kind 9.
        let mut buffer = BytesMut::from(&[0x04, 0x3F, 0, 0, 0, 11, 0, 0, 0, 4, 9][..]);
        buffer.extend_from_slice(&encoded(Message::new(5, MessageBody::Keepalive)));

        let bad = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(bad.id, 4);
        match &bad.body {
            MessageBody::Malformed {
                message_type,
                reason,
                payload,
            } => {
                assert_eq!(*message_type, 63);
                assert!(reason.contains("reader event kind 9"), "{reason}");
                assert_eq!(&payload[..], &[9]);
            }
            other => panic!("Expected Malformed body, got {other:?}"),
        }

        let next = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(next, Message::new(5, MessageBody::Keepalive));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_bad_version_is_error() {
        let mut codec = ReaderCodec::new();
        let mut buffer = BytesMut::from(&[0x08, 0x3E, 0, 0, 0, 10, 0, 0, 0, 1][..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(Error::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_decode_frame_too_large() {
        let mut codec = ReaderCodec::with_max_frame_size(16);
        // Header announcing a 1000 byte frame; body never needs to arrive.
        let mut buffer = BytesMut::new();
        FrameHeader::new(61, 990, 1).write(&mut buffer);

        match codec.decode(&mut buffer) {
            Err(Error::FrameTooLarge { size, max_size }) => {
                assert_eq!(size, 1000);
                assert_eq!(max_size, 16);
            }
            other => panic!("Expected FrameTooLarge error, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_frame_too_large() {
        let mut codec = ReaderCodec::with_max_frame_size(12);
        let mut buffer = BytesMut::new();
        let msg = Message::new(
            1,
            MessageBody::ErrorMessage(LlrpStatus::error(1, "this will not fit")),
        );

        assert!(matches!(
            codec.encode(msg, &mut buffer),
            Err(Error::FrameTooLarge { max_size: 12, .. })
        ));
        assert!(buffer.is_empty());
    }
}
