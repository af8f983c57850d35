//! Session configuration.
//!
//! # Example
//!
//! ```toml
//! [reader]
//! endpoint = "192.168.1.50:5084"
//! connect_timeout_ms = 5000
//! command_timeout_ms = 2000
//! event_capacity = 256
//! reset_on_connect = true
//! rospec_id = 1
//! gpi_trigger_port = 1
//! ```

use std::time::Duration;

use readerd_core::Endpoint;
use readerd_core::constants::{
    DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_EVENT_CAPACITY,
    DEFAULT_ROSPEC_ID,
};
use serde::{Deserialize, Serialize};

/// Configuration of one reader session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reader address.
    /// Default: localhost:5084
    pub endpoint: Endpoint,

    /// Time allowed to establish the connection.
    /// Default: 5000
    pub connect_timeout_ms: u64,

    /// Time allowed for the reader to acknowledge a command.
    /// Default: 2000
    pub command_timeout_ms: u64,

    /// Device events buffered between the link and the event pump.
    ///
    /// The buffer belongs to the link, so this is read when the link is
    /// built (`TcpLink::with_event_capacity`, `MockLink::with_event_capacity`)
    /// rather than by `SessionController`.
    /// Default: 256
    pub event_capacity: usize,

    /// Reset the reader to factory configuration after connecting.
    /// Default: true
    pub reset_on_connect: bool,

    /// ROSpec used for inventory.
    /// Default: 1
    pub rospec_id: u32,

    /// GPI port whose level starts (high) and stops (low) inventory.
    /// Default: none
    pub gpi_trigger_port: Option<u16>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            reset_on_connect: true,
            rospec_id: DEFAULT_ROSPEC_ID,
            gpi_trigger_port: None,
        }
    }
}

impl SessionConfig {
    /// Default configuration for `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.endpoint.port(), 5084);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.command_timeout(), Duration::from_secs(2));
        assert_eq!(config.event_capacity, 256);
        assert!(config.reset_on_connect);
        assert_eq!(config.gpi_trigger_port, None);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SessionConfig = serde_json::from_str(
            r#"{ "endpoint": "10.0.0.7", "reset_on_connect": false, "gpi_trigger_port": 1 }"#,
        )
        .unwrap();

        assert_eq!(config.endpoint.host(), "10.0.0.7");
        assert_eq!(config.endpoint.port(), 5084);
        assert!(!config.reset_on_connect);
        assert_eq!(config.gpi_trigger_port, Some(1));
        assert_eq!(config.command_timeout_ms, DEFAULT_COMMAND_TIMEOUT_MS);
    }

    #[test]
    fn test_deserialize_rejects_bad_endpoint() {
        let result: std::result::Result<SessionConfig, _> =
            serde_json::from_str(r#"{ "endpoint": ":5084" }"#);
        assert!(result.is_err());
    }
}
