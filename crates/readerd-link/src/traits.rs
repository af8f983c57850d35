//! Device Link trait definitions.
//!
//! The [`DeviceLink`] trait is the contract between the session controller
//! and a reader. Its futures are declared `Send` so that a controller generic
//! over the link can itself be driven from spawned tasks.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use readerd_core::{AntennaId, Endpoint, TagEvent};
use tokio::sync::mpsc;

use crate::error::Result;

/// Command sent to a reader that expects an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Return the reader to its factory configuration.
    Reset,

    /// Start inventory with the given ROSpec.
    StartInventory { rospec_id: u32 },

    /// Stop inventory with the given ROSpec.
    StopInventory { rospec_id: u32 },

    /// Ask the reader to end the session politely.
    CloseConnection,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Reset => CommandKind::Reset,
            Self::StartInventory { .. } => CommandKind::StartInventory,
            Self::StopInventory { .. } => CommandKind::StopInventory,
            Self::CloseConnection => CommandKind::CloseConnection,
        }
    }
}

/// Command without its arguments, used in errors and mock programming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Reset,
    StartInventory,
    StopInventory,
    CloseConnection,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reset => "SET_READER_CONFIG",
            Self::StartInventory => "START_ROSPEC",
            Self::StopInventory => "STOP_ROSPEC",
            Self::CloseConnection => "CLOSE_CONNECTION",
        };
        f.write_str(name)
    }
}

/// Successful acknowledgement of a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Message id the acknowledgement answered.
    pub message_id: u32,

    /// When the acknowledgement was received.
    pub received_at: DateTime<Utc>,
}

impl Ack {
    pub fn new(message_id: u32) -> Self {
        Self {
            message_id,
            received_at: Utc::now(),
        }
    }
}

/// Asynchronous event delivered by a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A tag was observed.
    TagRead(TagEvent),

    /// A general purpose input changed level.
    Gpi { port: u16, high: bool },

    /// An antenna was plugged or unplugged.
    Antenna { antenna: AntennaId, connected: bool },

    /// The reader reported the outcome of our connection attempt.
    ConnectionAttempt { accepted: bool },

    /// The link is gone; no further events follow.
    ConnectionLost { reason: String },
}

/// Shared liveness flag of one connection.
///
/// Cloned out of a connection handle so that liveness can be read without
/// access to the handle itself.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    /// A flag for a freshly established connection.
    pub fn alive() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn mark_dead(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Abstraction over the transport to a physical reader.
///
/// A link value is a factory and driver: `connect` returns an owned
/// [`Handle`](DeviceLink::Handle) for one connection, and every other
/// operation takes that handle. Implementations do not retry and do not
/// enforce timeouts; callers wrap calls in `tokio::time::timeout`.
///
/// # Examples
///
/// ```
/// use readerd_core::Endpoint;
/// use readerd_link::{Command, DeviceLink};
///
/// async fn start_inventory<L: DeviceLink>(link: &L) -> readerd_link::Result<L::Handle> {
///     let mut handle = link.connect(&Endpoint::default()).await?;
///     link.send_command(&mut handle, Command::StartInventory { rospec_id: 1 }).await?;
///     Ok(handle)
/// }
/// ```
pub trait DeviceLink: Send + Sync {
    /// One live connection.
    type Handle: Send + 'static;

    /// Establish a connection to `endpoint`.
    fn connect(&self, endpoint: &Endpoint) -> impl Future<Output = Result<Self::Handle>> + Send;

    /// Send `command` and wait for the reader to acknowledge it.
    ///
    /// # Errors
    ///
    /// - `LinkError::Rejected` if the reader answers with a failure status
    /// - `LinkError::ConnectionLost` if the link drops before the answer
    fn send_command(
        &self,
        handle: &mut Self::Handle,
        command: Command,
    ) -> impl Future<Output = Result<Ack>> + Send;

    /// Take the event stream of a connection.
    ///
    /// Events are delivered in the order the reader sent them. The stream
    /// can be taken once per connection.
    fn subscribe(&self, handle: &mut Self::Handle) -> Result<mpsc::Receiver<DeviceEvent>>;

    /// Close the connection.
    ///
    /// Best effort: the handle is consumed and the connection is gone
    /// afterwards even if an error is returned.
    fn close(&self, handle: Self::Handle) -> impl Future<Output = Result<()>> + Send;

    /// Liveness flag of a connection.
    fn liveness(&self, handle: &Self::Handle) -> Liveness;

    /// Whether the connection is still usable.
    fn is_alive(&self, handle: &Self::Handle) -> bool {
        self.liveness(handle).is_alive()
    }
}
