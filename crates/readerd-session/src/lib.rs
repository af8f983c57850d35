//! Reader session layer.
//!
//! Owns the lifecycle of one reader connection: connecting, starting and
//! stopping inventory, buffering tag reads, and tearing down. All access
//! goes through [`SessionController`].
//!
//! # Lifecycle
//!
//! ```text
//!  Disconnected ──start──> Connecting ──> Connected ──> Scanning
//!       ^                                    ^             │
//!       │                                    └── Stopping <┘ stop
//!       └──── disconnect / failure / link loss (from any state)
//! ```
//!
//! Tag reads are recorded only while `Scanning`, plus the reads the reader
//! delivers before acknowledging a stop.

pub mod buffer;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod gpi;
mod pump;
mod shared;
pub mod state;

pub use buffer::{TagBuffer, TagSummary};
pub use config::SessionConfig;
pub use controller::SessionController;
pub use error::{ErrorKind, LastError, Result, SessionError, TeardownWarning};
pub use events::LiveEvent;
pub use gpi::spawn_gpi_trigger;
pub use state::{InvalidTransition, LinkStatus, ReaderSession, SessionState, StateTransition};
