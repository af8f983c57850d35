//! Typed reader messages and their body encoding.
//!
//! Body layouts (all integers big-endian):
//!
//! | Message | Body |
//! |---------|------|
//! | `SET_READER_CONFIG` | `u8` reset-to-factory-default flag |
//! | `START_ROSPEC` / `STOP_ROSPEC` | `u32` ROSpec id |
//! | `*_RESPONSE`, `ERROR_MESSAGE` | status: `u16` code, `u16` len, UTF-8 description |
//! | `RO_ACCESS_REPORT` | `u16` count, then per tag (see below) |
//! | `READER_EVENT_NOTIFICATION` | `u8` kind, kind-specific fields |
//! | `CLOSE_CONNECTION`, `KEEPALIVE`, `KEEPALIVE_ACK` | empty |
//!
//! Tag report entry:
//!
//! ```text
//! u16 id_len | id bytes | u16 antenna | u8 flags | [i16 rssi] | [u16 channel]
//! | u16 seen_count | u64 last_seen (microseconds since the Unix epoch)
//! ```
//!
//! `flags` bit 0 marks RSSI present, bit 1 marks channel present.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use readerd_core::constants::STATUS_SUCCESS;
use readerd_core::{AntennaId, Error, Result, TagEvent, TagId};

const FLAG_RSSI: u8 = 0x01;
const FLAG_CHANNEL: u8 = 0x02;

const EVENT_CONNECTION_ATTEMPT: u8 = 0;
const EVENT_GPI: u8 = 1;
const EVENT_ANTENNA: u8 = 2;

/// Message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    SetReaderConfig = 3,
    CloseConnectionResponse = 4,
    SetReaderConfigResponse = 13,
    CloseConnection = 14,
    StartRospec = 22,
    StopRospec = 23,
    StartRospecResponse = 32,
    StopRospecResponse = 33,
    RoAccessReport = 61,
    Keepalive = 62,
    ReaderEventNotification = 63,
    KeepaliveAck = 72,
    ErrorMessage = 100,
}

impl MessageType {
    #[inline]
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// The response type a reader answers this request with, if any.
    pub fn response_type(self) -> Option<MessageType> {
        match self {
            Self::SetReaderConfig => Some(Self::SetReaderConfigResponse),
            Self::CloseConnection => Some(Self::CloseConnectionResponse),
            Self::StartRospec => Some(Self::StartRospecResponse),
            Self::StopRospec => Some(Self::StopRospecResponse),
            _ => None,
        }
    }

    /// Whether this message answers a request (and carries a status).
    pub fn is_response(self) -> bool {
        matches!(
            self,
            Self::SetReaderConfigResponse
                | Self::CloseConnectionResponse
                | Self::StartRospecResponse
                | Self::StopRospecResponse
                | Self::ErrorMessage
        )
    }
}

impl TryFrom<u16> for MessageType {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        Ok(match value {
            3 => Self::SetReaderConfig,
            4 => Self::CloseConnectionResponse,
            13 => Self::SetReaderConfigResponse,
            14 => Self::CloseConnection,
            22 => Self::StartRospec,
            23 => Self::StopRospec,
            32 => Self::StartRospecResponse,
            33 => Self::StopRospecResponse,
            61 => Self::RoAccessReport,
            62 => Self::Keepalive,
            63 => Self::ReaderEventNotification,
            72 => Self::KeepaliveAck,
            100 => Self::ErrorMessage,
            other => return Err(Error::UnknownMessageType(other)),
        })
    }
}

/// Status carried by responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlrpStatus {
    pub code: u16,
    pub description: String,
}

impl LlrpStatus {
    pub fn success() -> Self {
        Self {
            code: STATUS_SUCCESS,
            description: String::new(),
        }
    }

    pub fn error(code: u16, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == STATUS_SUCCESS
    }
}

/// Asynchronous notification raised by the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// Sent once after the TCP connection is accepted (status 0) or refused.
    ConnectionAttempt { status: u16 },
    /// General purpose input changed level.
    Gpi { port: u16, high: bool },
    /// Antenna connected or disconnected.
    Antenna { antenna: u16, connected: bool },
}

/// Message body, one variant per [`MessageType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    SetReaderConfig { reset_to_factory_default: bool },
    SetReaderConfigResponse(LlrpStatus),
    CloseConnection,
    CloseConnectionResponse(LlrpStatus),
    StartRospec { rospec_id: u32 },
    StartRospecResponse(LlrpStatus),
    StopRospec { rospec_id: u32 },
    StopRospecResponse(LlrpStatus),
    RoAccessReport(Vec<TagEvent>),
    Keepalive,
    KeepaliveAck,
    ReaderEventNotification(ReaderEvent),
    ErrorMessage(LlrpStatus),
    /// A type this implementation does not understand; kept so a stream
    /// survives vendor extensions.
    Unknown { message_type: u16, payload: Bytes },
    /// A correctly framed message whose body failed to parse. The framing
    /// is intact, so the stream stays usable.
    Malformed {
        message_type: u16,
        reason: String,
        payload: Bytes,
    },
}

impl MessageBody {
    /// Raw type code of this body.
    pub fn type_code(&self) -> u16 {
        match self {
            Self::SetReaderConfig { .. } => MessageType::SetReaderConfig.as_u16(),
            Self::SetReaderConfigResponse(_) => MessageType::SetReaderConfigResponse.as_u16(),
            Self::CloseConnection => MessageType::CloseConnection.as_u16(),
            Self::CloseConnectionResponse(_) => MessageType::CloseConnectionResponse.as_u16(),
            Self::StartRospec { .. } => MessageType::StartRospec.as_u16(),
            Self::StartRospecResponse(_) => MessageType::StartRospecResponse.as_u16(),
            Self::StopRospec { .. } => MessageType::StopRospec.as_u16(),
            Self::StopRospecResponse(_) => MessageType::StopRospecResponse.as_u16(),
            Self::RoAccessReport(_) => MessageType::RoAccessReport.as_u16(),
            Self::Keepalive => MessageType::Keepalive.as_u16(),
            Self::KeepaliveAck => MessageType::KeepaliveAck.as_u16(),
            Self::ReaderEventNotification(_) => MessageType::ReaderEventNotification.as_u16(),
            Self::ErrorMessage(_) => MessageType::ErrorMessage.as_u16(),
            Self::Unknown { message_type, .. } | Self::Malformed { message_type, .. } => {
                *message_type
            }
        }
    }

    /// Status of a response body, `None` for requests and notifications.
    pub fn status(&self) -> Option<&LlrpStatus> {
        match self {
            Self::SetReaderConfigResponse(s)
            | Self::CloseConnectionResponse(s)
            | Self::StartRospecResponse(s)
            | Self::StopRospecResponse(s)
            | Self::ErrorMessage(s) => Some(s),
            _ => None,
        }
    }
}

/// A framed message: id plus typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u32,
    pub body: MessageBody,
}

impl Message {
    pub fn new(id: u32, body: MessageBody) -> Self {
        Self { id, body }
    }

    /// Known message type, `None` for [`MessageBody::Unknown`].
    ///
    /// A [`MessageBody::Malformed`] body still reports the type its header
    /// announced.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.body.type_code()).ok()
    }

    /// Encode the body (without header) into `dst`.
    pub fn encode_body(&self, dst: &mut BytesMut) -> Result<()> {
        match &self.body {
            MessageBody::SetReaderConfig {
                reset_to_factory_default,
            } => dst.put_u8(u8::from(*reset_to_factory_default)),
            MessageBody::StartRospec { rospec_id } | MessageBody::StopRospec { rospec_id } => {
                dst.put_u32(*rospec_id)
            }
            MessageBody::SetReaderConfigResponse(status)
            | MessageBody::CloseConnectionResponse(status)
            | MessageBody::StartRospecResponse(status)
            | MessageBody::StopRospecResponse(status)
            | MessageBody::ErrorMessage(status) => put_status(dst, status)?,
            MessageBody::RoAccessReport(tags) => {
                let count = u16::try_from(tags.len()).map_err(|_| {
                    Error::InvalidMessageFormat(format!("Too many tags in report: {}", tags.len()))
                })?;
                dst.put_u16(count);
                for tag in tags {
                    put_tag(dst, tag)?;
                }
            }
            MessageBody::ReaderEventNotification(event) => match event {
                ReaderEvent::ConnectionAttempt { status } => {
                    dst.put_u8(EVENT_CONNECTION_ATTEMPT);
                    dst.put_u16(*status);
                }
                ReaderEvent::Gpi { port, high } => {
                    dst.put_u8(EVENT_GPI);
                    dst.put_u16(*port);
                    dst.put_u8(u8::from(*high));
                }
                ReaderEvent::Antenna { antenna, connected } => {
                    dst.put_u8(EVENT_ANTENNA);
                    dst.put_u16(*antenna);
                    dst.put_u8(u8::from(*connected));
                }
            },
            MessageBody::CloseConnection | MessageBody::Keepalive | MessageBody::KeepaliveAck => {}
            MessageBody::Unknown { payload, .. } | MessageBody::Malformed { payload, .. } => {
                dst.extend_from_slice(payload)
            }
        }
        Ok(())
    }

    /// Decode a body of type `message_type`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Truncated` or `Error::InvalidMessageFormat` when the
    /// body does not match the layout for its type. Unknown types are not an
    /// error; they decode to [`MessageBody::Unknown`].
    pub fn decode(message_type: u16, id: u32, mut body: Bytes) -> Result<Self> {
        let kind = match MessageType::try_from(message_type) {
            Ok(kind) => kind,
            Err(_) => {
                return Ok(Self::new(
                    id,
                    MessageBody::Unknown {
                        message_type,
                        payload: body,
                    },
                ));
            }
        };

        let buf = &mut body;
        let decoded = match kind {
            MessageType::SetReaderConfig => {
                need(buf, 1, "reader config")?;
                MessageBody::SetReaderConfig {
                    reset_to_factory_default: buf.get_u8() != 0,
                }
            }
            MessageType::StartRospec => {
                need(buf, 4, "rospec id")?;
                MessageBody::StartRospec {
                    rospec_id: buf.get_u32(),
                }
            }
            MessageType::StopRospec => {
                need(buf, 4, "rospec id")?;
                MessageBody::StopRospec {
                    rospec_id: buf.get_u32(),
                }
            }
            MessageType::SetReaderConfigResponse => {
                MessageBody::SetReaderConfigResponse(get_status(buf)?)
            }
            MessageType::CloseConnectionResponse => {
                MessageBody::CloseConnectionResponse(get_status(buf)?)
            }
            MessageType::StartRospecResponse => MessageBody::StartRospecResponse(get_status(buf)?),
            MessageType::StopRospecResponse => MessageBody::StopRospecResponse(get_status(buf)?),
            MessageType::ErrorMessage => MessageBody::ErrorMessage(get_status(buf)?),
            MessageType::RoAccessReport => {
                need(buf, 2, "tag count")?;
                let count = buf.get_u16() as usize;
                let tags = (0..count)
                    .map(|_| get_tag(buf))
                    .collect::<Result<Vec<_>>>()?;
                MessageBody::RoAccessReport(tags)
            }
            MessageType::ReaderEventNotification => {
                MessageBody::ReaderEventNotification(get_reader_event(buf)?)
            }
            MessageType::CloseConnection => MessageBody::CloseConnection,
            MessageType::Keepalive => MessageBody::Keepalive,
            MessageType::KeepaliveAck => MessageBody::KeepaliveAck,
        };

        if buf.has_remaining() {
            return Err(Error::InvalidMessageFormat(format!(
                "{} trailing bytes after {kind:?} body",
                buf.remaining()
            )));
        }

        Ok(Self::new(id, decoded))
    }
}

fn need(buf: &Bytes, needed: usize, what: &'static str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(Error::Truncated {
            what,
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn put_status(dst: &mut BytesMut, status: &LlrpStatus) -> Result<()> {
    let description = status.description.as_bytes();
    let len = u16::try_from(description.len()).map_err(|_| {
        Error::InvalidMessageFormat("Status description longer than 65535 bytes".to_string())
    })?;
    dst.put_u16(status.code);
    dst.put_u16(len);
    dst.extend_from_slice(description);
    Ok(())
}

fn get_status(buf: &mut Bytes) -> Result<LlrpStatus> {
    need(buf, 4, "status")?;
    let code = buf.get_u16();
    let len = buf.get_u16() as usize;
    need(buf, len, "status description")?;
    let description = String::from_utf8(buf.split_to(len).to_vec())
        .map_err(|e| Error::InvalidMessageFormat(format!("Invalid UTF-8 in status: {e}")))?;
    Ok(LlrpStatus { code, description })
}

fn put_tag(dst: &mut BytesMut, tag: &TagEvent) -> Result<()> {
    let id = tag.tag_id().as_bytes();
    dst.put_u16(id.len() as u16);
    dst.extend_from_slice(id);
    dst.put_u16(tag.antenna().as_u16());

    let mut flags = 0;
    if tag.rssi().is_some() {
        flags |= FLAG_RSSI;
    }
    if tag.channel().is_some() {
        flags |= FLAG_CHANNEL;
    }
    dst.put_u8(flags);
    if let Some(rssi) = tag.rssi() {
        dst.put_i16(rssi);
    }
    if let Some(channel) = tag.channel() {
        dst.put_u16(channel);
    }

    dst.put_u16(tag.seen_count());
    let micros = u64::try_from(tag.timestamp().timestamp_micros()).map_err(|_| {
        Error::InvalidMessageFormat(format!("Timestamp before epoch: {}", tag.timestamp()))
    })?;
    dst.put_u64(micros);
    Ok(())
}

fn get_tag(buf: &mut Bytes) -> Result<TagEvent> {
    need(buf, 2, "tag id length")?;
    let id_len = buf.get_u16() as usize;
    need(buf, id_len, "tag id")?;
    let tag_id = TagId::new(buf.split_to(id_len).to_vec())?;

    need(buf, 3, "antenna and flags")?;
    let antenna = AntennaId::new(buf.get_u16());
    let flags = buf.get_u8();

    let rssi = if flags & FLAG_RSSI != 0 {
        need(buf, 2, "rssi")?;
        Some(buf.get_i16())
    } else {
        None
    };
    let channel = if flags & FLAG_CHANNEL != 0 {
        need(buf, 2, "channel")?;
        Some(buf.get_u16())
    } else {
        None
    };

    need(buf, 10, "seen count and timestamp")?;
    let seen_count = buf.get_u16();
    let micros = buf.get_u64();
    let timestamp = i64::try_from(micros)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_micros)
        .ok_or_else(|| Error::InvalidMessageFormat(format!("Timestamp out of range: {micros}")))?;

    let mut event = TagEvent::new(tag_id, antenna, timestamp).with_seen_count(seen_count);
    if let Some(rssi) = rssi {
        event = event.with_rssi(rssi);
    }
    if let Some(channel) = channel {
        event = event.with_channel(channel);
    }
    Ok(event)
}

fn get_reader_event(buf: &mut Bytes) -> Result<ReaderEvent> {
    need(buf, 1, "event kind")?;
    match buf.get_u8() {
        EVENT_CONNECTION_ATTEMPT => {
            need(buf, 2, "connection status")?;
            Ok(ReaderEvent::ConnectionAttempt {
                status: buf.get_u16(),
            })
        }
        EVENT_GPI => {
            need(buf, 3, "gpi event")?;
            Ok(ReaderEvent::Gpi {
                port: buf.get_u16(),
                high: buf.get_u8() != 0,
            })
        }
        EVENT_ANTENNA => {
            need(buf, 3, "antenna event")?;
            Ok(ReaderEvent::Antenna {
                antenna: buf.get_u16(),
                connected: buf.get_u8() != 0,
            })
        }
        other => Err(Error::InvalidMessageFormat(format!(
            "Unknown reader event kind {other}"
        ))),
    }
}
