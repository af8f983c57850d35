//! Error types for device link operations.

use crate::traits::CommandKind;

/// Result type alias for device link operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors that can occur while talking to a reader.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The endpoint could not be reached.
    #[error("Endpoint {endpoint} unreachable: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The link went away while in use.
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// The reader answered a command with a failure status.
    #[error("Reader rejected {command}: status {code} ({description})")]
    Rejected {
        command: CommandKind,
        code: u16,
        description: String,
    },

    /// The reader answered a command with the wrong message type.
    #[error("Unexpected response to {command}: message type {message_type}")]
    UnexpectedResponse {
        command: CommandKind,
        message_type: u16,
    },

    /// The event stream of a connection was already handed out.
    #[error("Event stream already subscribed")]
    AlreadySubscribed,

    /// Framing or message decoding failed.
    #[error("Protocol error: {0}")]
    Protocol(readerd_core::Error),

    /// Low-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Create a new connection lost error.
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    /// Create a new rejected command error.
    pub fn rejected(command: CommandKind, code: u16, description: impl Into<String>) -> Self {
        Self::Rejected {
            command,
            code,
            description: description.into(),
        }
    }

    /// Whether the error means the physical link is unusable.
    ///
    /// Everything else is a failure of the reader to carry out a command
    /// over a link that still works.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. } | Self::ConnectionLost { .. } | Self::Io(_)
        )
    }
}

impl From<readerd_core::Error> for LinkError {
    fn from(err: readerd_core::Error) -> Self {
        match err {
            readerd_core::Error::Io(e) => Self::Io(e),
            other => Self::Protocol(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(LinkError::connection_lost("eof"), true)]
    #[case(LinkError::Io(std::io::Error::other("reset")), true)]
    #[case(LinkError::Unreachable {
        endpoint: "10.0.0.1:5084".into(),
        source: std::io::ErrorKind::ConnectionRefused.into(),
    }, true)]
    #[case(LinkError::rejected(CommandKind::StartInventory, 100, "busy"), false)]
    #[case(LinkError::AlreadySubscribed, false)]
    #[case(LinkError::Protocol(readerd_core::Error::UnsupportedVersion(2)), false)]
    fn test_is_connection(#[case] err: LinkError, #[case] expected: bool) {
        assert_eq!(err.is_connection(), expected);
    }

    #[test]
    fn test_core_io_error_unwraps_to_io() {
        let err: LinkError = readerd_core::Error::Io(std::io::Error::other("broken pipe")).into();
        assert!(matches!(err, LinkError::Io(_)));
        assert!(err.is_connection());
    }

    #[test]
    fn test_rejected_display() {
        let err = LinkError::rejected(CommandKind::StopInventory, 401, "no such rospec");
        assert_eq!(
            err.to_string(),
            "Reader rejected STOP_ROSPEC: status 401 (no such rospec)"
        );
    }
}
