//! Enum wrapper for device link dispatch.
//!
//! `DeviceLink` uses `impl Future` return types, so it is not object-safe
//! and cannot be used as `Box<dyn DeviceLink>`. Binaries that choose the
//! link at runtime use [`AnyDeviceLink`] instead; the session controller
//! stays generic and monomorphizes over it.
//!
//! # Examples
//!
//! ```
//! use readerd_core::Endpoint;
//! use readerd_link::mock::MockLink;
//! use readerd_link::{AnyDeviceLink, DeviceLink};
//!
//! #[tokio::main]
//! async fn main() -> readerd_link::Result<()> {
//!     let (mock, _control) = MockLink::new();
//!     let link = AnyDeviceLink::Mock(mock);
//!
//!     let conn = link.connect(&Endpoint::default()).await?;
//!     assert!(link.is_alive(&conn));
//!     link.close(conn).await
//! }
//! ```

use readerd_core::Endpoint;
use tokio::sync::mpsc;

use crate::error::{LinkError, Result};
use crate::mock::{MockConnection, MockLink};
use crate::tcp::{TcpConnection, TcpLink};
use crate::traits::{Ack, Command, DeviceEvent, DeviceLink, Liveness};

/// Enum wrapper over the available links.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AnyDeviceLink {
    /// Reader over TCP.
    Tcp(TcpLink),

    /// Simulated reader.
    Mock(MockLink),
}

/// Connection handle of an [`AnyDeviceLink`].
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyConnection {
    Tcp(TcpConnection),
    Mock(MockConnection),
}

fn mismatch() -> LinkError {
    LinkError::connection_lost("connection handle belongs to a different link")
}

impl DeviceLink for AnyDeviceLink {
    type Handle = AnyConnection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<AnyConnection> {
        match self {
            Self::Tcp(link) => link.connect(endpoint).await.map(AnyConnection::Tcp),
            Self::Mock(link) => link.connect(endpoint).await.map(AnyConnection::Mock),
        }
    }

    async fn send_command(&self, handle: &mut AnyConnection, command: Command) -> Result<Ack> {
        match (self, handle) {
            (Self::Tcp(link), AnyConnection::Tcp(conn)) => link.send_command(conn, command).await,
            (Self::Mock(link), AnyConnection::Mock(conn)) => link.send_command(conn, command).await,
            _ => Err(mismatch()),
        }
    }

    fn subscribe(&self, handle: &mut AnyConnection) -> Result<mpsc::Receiver<DeviceEvent>> {
        match (self, handle) {
            (Self::Tcp(link), AnyConnection::Tcp(conn)) => link.subscribe(conn),
            (Self::Mock(link), AnyConnection::Mock(conn)) => link.subscribe(conn),
            _ => Err(mismatch()),
        }
    }

    async fn close(&self, handle: AnyConnection) -> Result<()> {
        match (self, handle) {
            (Self::Tcp(link), AnyConnection::Tcp(conn)) => link.close(conn).await,
            (Self::Mock(link), AnyConnection::Mock(conn)) => link.close(conn).await,
            _ => Err(mismatch()),
        }
    }

    fn liveness(&self, handle: &AnyConnection) -> Liveness {
        match handle {
            AnyConnection::Tcp(conn) => conn.liveness(),
            AnyConnection::Mock(conn) => conn.liveness(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::CommandKind;

    #[tokio::test]
    async fn test_any_device_link_mock() {
        let (mock, control) = MockLink::new();
        let link = AnyDeviceLink::Mock(mock);

        let mut conn = link.connect(&Endpoint::default()).await.unwrap();
        link.send_command(&mut conn, Command::StartInventory { rospec_id: 1 })
            .await
            .unwrap();
        assert!(control.is_scanning());

        control.reject(CommandKind::StopInventory, 7, "busy");
        assert!(
            link.send_command(&mut conn, Command::StopInventory { rospec_id: 1 })
                .await
                .is_err()
        );

        link.close(conn).await.unwrap();
        assert!(!control.is_connected());
    }

    #[tokio::test]
    async fn test_any_device_link_handle_mismatch() {
        let (mock, _control) = MockLink::new();
        let mut conn = AnyDeviceLink::Mock(mock)
            .connect(&Endpoint::default())
            .await
            .unwrap();

        let tcp = AnyDeviceLink::Tcp(TcpLink::new());
        assert!(tcp.subscribe(&mut conn).is_err());
        assert!(tcp.send_command(&mut conn, Command::Reset).await.is_err());
    }
}
