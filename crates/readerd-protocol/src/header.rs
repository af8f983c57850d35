use bytes::{Buf, BufMut, BytesMut};
use readerd_core::constants::{HEADER_LEN, MESSAGE_TYPE_MASK, PROTOCOL_VERSION};
use readerd_core::{Error, Result};

/// Fixed-size frame header.
///
/// ```text
/// u16: 000 vvv tttttttttt   (reserved, version, message type)
/// u32: total length including this header
/// u32: message id
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub message_type: u16,
    pub length: u32,
    pub message_id: u32,
}

impl FrameHeader {
    /// Header for a frame carrying `body_len` bytes of body.
    pub fn new(message_type: u16, body_len: usize, message_id: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message_type: message_type & MESSAGE_TYPE_MASK,
            length: (HEADER_LEN + body_len) as u32,
            message_id,
        }
    }

    /// Parse a header from the first [`HEADER_LEN`] bytes of `src`.
    ///
    /// Does not consume `src`. Returns `Ok(None)` if fewer than
    /// [`HEADER_LEN`] bytes are available.
    ///
    /// # Errors
    ///
    /// - `Error::UnsupportedVersion` if the version bits differ from
    ///   [`PROTOCOL_VERSION`]
    /// - `Error::InvalidMessageFormat` if the reserved bits are set or the
    ///   length is smaller than the header itself
    pub fn peek(src: &[u8]) -> Result<Option<Self>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut buf = &src[..HEADER_LEN];
        let word = buf.get_u16();
        let length = buf.get_u32();
        let message_id = buf.get_u32();

        if word >> 13 != 0 {
            return Err(Error::InvalidMessageFormat(format!(
                "Reserved header bits set: {word:#06x}"
            )));
        }

        let version = ((word >> 10) & 0x07) as u8;
        if version != PROTOCOL_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        if (length as usize) < HEADER_LEN {
            return Err(Error::InvalidMessageFormat(format!(
                "Frame length {length} shorter than header"
            )));
        }

        Ok(Some(Self {
            version,
            message_type: word & MESSAGE_TYPE_MASK,
            length,
            message_id,
        }))
    }

    /// Write the header to `dst`.
    pub fn write(&self, dst: &mut BytesMut) {
        let word = (u16::from(self.version & 0x07) << 10) | (self.message_type & MESSAGE_TYPE_MASK);
        dst.put_u16(word);
        dst.put_u32(self.length);
        dst.put_u32(self.message_id);
    }

    /// Body length implied by the header.
    pub fn body_len(&self) -> usize {
        self.length as usize - HEADER_LEN
    }
}
