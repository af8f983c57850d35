//! Mock device link for testing and simulation.
//!
//! The mock speaks no protocol. A [`MockLinkHandle`] programs how the next
//! commands are answered and injects events into the live connection.

pub mod link;

pub use link::{MockConnection, MockLink, MockLinkHandle};
