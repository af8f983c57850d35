//! Error types for session operations.
//!
//! Every operation of the [`SessionController`](crate::SessionController)
//! returns a typed [`SessionError`]. Failures that are not worth surfacing
//! (a close that did not complete cleanly) are reported as a
//! [`TeardownWarning`] in the log instead.

use std::fmt;

use chrono::{DateTime, Utc};
use readerd_core::Endpoint;
use readerd_link::LinkError;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::SessionState;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors returned by session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The reader could not be reached, or the link to it was lost.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The reader rejected a command or did not acknowledge it in time.
    #[error("Device error: {message}")]
    Device { message: String },

    /// The operation requires the session to be scanning.
    #[error("Not scanning (state: {state})")]
    NotScanning { state: SessionState },

    /// Inventory is already running.
    #[error("Already scanning")]
    AlreadyScanning,

    /// A pending start was aborted by shutdown or disconnect.
    #[error("Start cancelled")]
    Cancelled,
}

impl SessionError {
    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new device error.
    pub fn device(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
        }
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Device { .. } => ErrorKind::Device,
            Self::NotScanning { .. } => ErrorKind::NotScanning,
            Self::AlreadyScanning => ErrorKind::AlreadyScanning,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// HTTP status an API shell should answer with.
    ///
    /// ```
    /// use readerd_session::SessionError;
    ///
    /// assert_eq!(SessionError::connection("refused").http_status(), 503);
    /// assert_eq!(SessionError::device("rejected").http_status(), 502);
    /// assert_eq!(SessionError::AlreadyScanning.http_status(), 409);
    /// ```
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Connection | ErrorKind::Cancelled => 503,
            ErrorKind::Device => 502,
            ErrorKind::NotScanning | ErrorKind::AlreadyScanning => 409,
        }
    }
}

impl From<LinkError> for SessionError {
    fn from(err: LinkError) -> Self {
        if err.is_connection() {
            Self::connection(err.to_string())
        } else {
            Self::device(err.to_string())
        }
    }
}

/// Category of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Device,
    NotScanning,
    AlreadyScanning,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Connection => "connection",
            Self::Device => "device",
            Self::NotScanning => "not_scanning",
            Self::AlreadyScanning => "already_scanning",
            Self::Cancelled => "cancelled",
        };
        f.write_str(kind)
    }
}

/// Last failure recorded on a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl LastError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

impl From<&SessionError> for LastError {
    fn from(err: &SessionError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Non-fatal failure while closing a connection.
///
/// Never returned; [`emit`](TeardownWarning::emit) logs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownWarning {
    pub endpoint: Endpoint,
    pub message: String,
}

impl TeardownWarning {
    pub fn new(endpoint: Endpoint, message: impl Into<String>) -> Self {
        Self {
            endpoint,
            message: message.into(),
        }
    }

    pub fn emit(&self) {
        warn!(endpoint = %self.endpoint, "{}", self);
    }
}

impl fmt::Display for TeardownWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Teardown warning: {}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readerd_link::CommandKind;
    use rstest::rstest;

    #[rstest]
    #[case(SessionError::connection("x"), ErrorKind::Connection, 503)]
    #[case(SessionError::device("x"), ErrorKind::Device, 502)]
    #[case(SessionError::NotScanning { state: SessionState::Connected }, ErrorKind::NotScanning, 409)]
    #[case(SessionError::AlreadyScanning, ErrorKind::AlreadyScanning, 409)]
    #[case(SessionError::Cancelled, ErrorKind::Cancelled, 503)]
    fn test_kind_and_http_status(
        #[case] err: SessionError,
        #[case] kind: ErrorKind,
        #[case] status: u16,
    ) {
        assert_eq!(err.kind(), kind);
        assert_eq!(err.http_status(), status);
    }

    #[test]
    fn test_from_link_error() {
        let err: SessionError = LinkError::connection_lost("eof").into();
        assert_eq!(err.kind(), ErrorKind::Connection);

        let err: SessionError = LinkError::rejected(CommandKind::StartInventory, 5, "busy").into();
        assert_eq!(err.kind(), ErrorKind::Device);
        assert!(err.to_string().contains("START_ROSPEC"));
    }

    #[test]
    fn test_not_scanning_display() {
        let err = SessionError::NotScanning {
            state: SessionState::Disconnected,
        };
        assert_eq!(err.to_string(), "Not scanning (state: disconnected)");
    }

    #[test]
    fn test_last_error_serializes_kind() {
        let last = LastError::from(&SessionError::device("timeout"));
        let json = serde_json::to_value(&last).unwrap();
        assert_eq!(json["kind"], "device");
        assert_eq!(json["message"], "Device error: timeout");
    }
}
