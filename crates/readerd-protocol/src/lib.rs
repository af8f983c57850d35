//! Wire protocol spoken between the control core and a networked reader.
//!
//! Every frame starts with an LLRP-style 10-byte header (see
//! [`readerd_core::constants`]) followed by a compact, type-specific body.
//! [`ReaderCodec`] plugs the framing into `tokio_util::codec::Framed`.

pub mod codec;
pub mod header;
pub mod message;

pub use codec::ReaderCodec;
pub use header::FrameHeader;
pub use message::{LlrpStatus, Message, MessageBody, MessageType, ReaderEvent};
