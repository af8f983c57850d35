//! Core constants for the reader protocol and session defaults.
//!
//! The wire layout follows the LLRP message header:
//!
//! ```text
//!  0               1               2               3
//! +-----+-----+-------------------+-------------------------------+
//! | rsv | ver |   message type    |        message length ...     |
//! +-----+-----+-------------------+-------------------------------+
//! |  ... message length           |        message id ...         |
//! +-------------------------------+-------------------------------+
//! |  ... message id               |        body ...               |
//! +-------------------------------+-------------------------------+
//! ```
//!
//! - `rsv` - 3 reserved bits, always zero
//! - `ver` - 3 bit protocol version
//! - `message type` - 10 bit message type code
//! - `message length` - total length in bytes, header included
//! - `message id` - correlates a response with its request
//!
//! # Usage
//!
//! ```
//! use readerd_core::constants::*;
//! use std::time::Duration;
//!
//! assert_eq!(HEADER_LEN, 10);
//! let connect = Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS);
//! assert_eq!(connect.as_secs(), 5);
//! ```

// ============================================================================
// Wire protocol
// ============================================================================

/// Protocol version carried in every header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed header length: 2 bytes type/version, 4 bytes length, 4 bytes id.
pub const HEADER_LEN: usize = 10;

/// Mask for the 10-bit message type.
pub const MESSAGE_TYPE_MASK: u16 = 0x03FF;

/// Largest frame accepted or produced by the codec (64 KB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default TCP port of an LLRP reader.
pub const LLRP_DEFAULT_PORT: u16 = 5084;

/// LLRP status code for success.
pub const STATUS_SUCCESS: u16 = 0;

// ============================================================================
// Tag identifiers
// ============================================================================

/// Minimum tag identifier length in bytes.
pub const MIN_TAG_ID_LEN: usize = 1;

/// Maximum tag identifier length in bytes (496-bit EPC).
pub const MAX_TAG_ID_LEN: usize = 62;

// ============================================================================
// Session defaults
// ============================================================================

/// Time allowed to establish the physical connection.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Time allowed for the reader to acknowledge a command.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 2000;

/// Time allowed for each step of a best-effort close.
pub const TEARDOWN_TIMEOUT_MS: u64 = 500;

/// Capacity of the device event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// ROSpec used for inventory when none is configured.
pub const DEFAULT_ROSPEC_ID: u32 = 1;
