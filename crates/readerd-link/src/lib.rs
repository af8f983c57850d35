//! Device Link layer for readerd.
//!
//! A Device Link is the seam between the session controller and a physical
//! reader. It connects to an [`Endpoint`](readerd_core::Endpoint), sends
//! inventory commands and waits for their acknowledgement, and hands the
//! asynchronous stream of tag reads and reader notifications to a single
//! subscriber through a bounded channel.
//!
//! # Implementations
//!
//! - [`TcpLink`]: a real reader over TCP, framed with
//!   [`ReaderCodec`](readerd_protocol::ReaderCodec)
//! - [`mock::MockLink`]: a programmable link for tests and simulation
//! - [`AnyDeviceLink`]: enum dispatch over both, for binaries that pick the
//!   link at runtime
//!
//! # Example
//!
//! ```
//! use readerd_core::Endpoint;
//! use readerd_link::mock::MockLink;
//! use readerd_link::{Command, DeviceLink};
//!
//! # #[tokio::main]
//! # async fn main() -> readerd_link::Result<()> {
//! let (link, _control) = MockLink::new();
//! let mut conn = link.connect(&Endpoint::default()).await?;
//! let mut events = link.subscribe(&mut conn)?;
//!
//! link.send_command(&mut conn, Command::StartInventory { rospec_id: 1 }).await?;
//! assert!(link.is_alive(&conn));
//! # drop(events.try_recv());
//! link.close(conn).await?;
//! # Ok(())
//! # }
//! ```

pub mod devices;
pub mod error;
pub mod mock;
pub mod tcp;
pub mod traits;

pub use devices::{AnyConnection, AnyDeviceLink};
pub use error::{LinkError, Result};
pub use tcp::{TcpConnection, TcpLink};
pub use traits::{Ack, Command, CommandKind, DeviceEvent, DeviceLink, Liveness};
