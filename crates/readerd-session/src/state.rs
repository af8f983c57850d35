//! Reader session state machine.
//!
//! # States
//!
//! - `Disconnected`: no physical connection (initial and terminal)
//! - `Connecting`: connection attempt in flight
//! - `Connected`: link up, inventory idle
//! - `Scanning`: inventory running, tag reads are recorded
//! - `Stopping`: stop sent, reads in flight are still recorded
//!
//! # Valid Transitions
//!
//! - Disconnected → Connecting → Connected → Scanning → Stopping → Connected
//! - Any other state → Disconnected
//!
//! # Examples
//!
//! ```
//! use readerd_core::Endpoint;
//! use readerd_session::{ReaderSession, SessionState};
//!
//! let mut session = ReaderSession::new(Endpoint::default());
//! session.transition_to(SessionState::Connecting).unwrap();
//! session.transition_to(SessionState::Connected).unwrap();
//!
//! assert!(session.transition_to(SessionState::Stopping).is_err());
//! assert_eq!(session.transitions().len(), 2);
//! ```

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use readerd_core::Endpoint;
use serde::{Deserialize, Serialize};

use crate::error::LastError;

/// Maximum number of state transitions kept on a session.
///
/// One start/stop cycle is four transitions, so this covers the last
/// eight cycles.
const MAX_HISTORY_SIZE: usize = 32;

/// Lifecycle state of a reader session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Scanning,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Scanning => "scanning",
            SessionState::Stopping => "stopping",
        };
        f.write_str(state_str)
    }
}

impl SessionState {
    /// Check if transition to `target` is valid from this state.
    ///
    /// ```
    /// use readerd_session::SessionState;
    ///
    /// assert!(SessionState::Scanning.can_transition_to(&SessionState::Stopping));
    /// assert!(SessionState::Stopping.can_transition_to(&SessionState::Disconnected));
    /// assert!(!SessionState::Connected.can_transition_to(&SessionState::Stopping));
    /// ```
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        matches!(
            (self, target),
            (SessionState::Disconnected, SessionState::Connecting)
                | (SessionState::Connecting, SessionState::Connected)
                | (SessionState::Connected, SessionState::Scanning)
                | (SessionState::Scanning, SessionState::Stopping)
                | (SessionState::Stopping, SessionState::Connected)
                | (
                    SessionState::Connecting
                        | SessionState::Connected
                        | SessionState::Scanning
                        | SessionState::Stopping,
                    SessionState::Disconnected
                )
        )
    }

    /// Whether tag reads are recorded in this state.
    pub fn accepts_tags(&self) -> bool {
        matches!(self, SessionState::Scanning | SessionState::Stopping)
    }

    /// Whether this state only exists while an operation is in flight.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Stopping)
    }
}

/// Physical link status, independent of inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkStatus::Connected)
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkStatus::Connected => "connected",
            LinkStatus::Disconnected => "disconnected",
        })
    }
}

/// A single state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub at: DateTime<Utc>,
}

impl StateTransition {
    pub fn new(from: SessionState, to: SessionState) -> Self {
        Self {
            from,
            to,
            at: Utc::now(),
        }
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid state transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// One physical reader connection and its observable state.
///
/// Owned by the controller; [`SessionController::session`] hands out
/// copies.
///
/// [`SessionController::session`]: crate::SessionController::session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReaderSession {
    endpoint: Endpoint,
    state: SessionState,
    last_error: Option<LastError>,
    started_at: Option<DateTime<Utc>>,
    accepted_events: u64,
    dropped_events: u64,
    transitions: VecDeque<StateTransition>,
}

impl ReaderSession {
    /// A disconnected session for `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            state: SessionState::Disconnected,
            last_error: None,
            started_at: None,
            accepted_events: 0,
            dropped_events: 0,
            transitions: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    /// When the current connection was established.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Tag reads recorded in the buffer.
    pub fn accepted_events(&self) -> u64 {
        self.accepted_events
    }

    /// Tag reads discarded because inventory was not running.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    /// Recent transitions, oldest first.
    pub fn transitions(&self) -> &VecDeque<StateTransition> {
        &self.transitions
    }

    /// Transition to `to`, validating it against the transition table.
    ///
    /// Entering `Connected` from `Connecting` stamps `started_at`; entering
    /// `Disconnected` clears it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the move is not allowed from the
    /// current state. The session is unchanged in that case.
    pub fn transition_to(
        &mut self,
        to: SessionState,
    ) -> std::result::Result<StateTransition, InvalidTransition> {
        if !self.state.can_transition_to(&to) {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }

        let transition = StateTransition::new(self.state, to);
        match (self.state, to) {
            (SessionState::Connecting, SessionState::Connected) => {
                self.started_at = Some(transition.at);
            }
            (_, SessionState::Disconnected) => self.started_at = None,
            _ => {}
        }

        self.state = to;
        if self.transitions.len() >= MAX_HISTORY_SIZE {
            self.transitions.pop_front();
        }
        self.transitions.push_back(transition.clone());
        Ok(transition)
    }

    pub fn record_error(&mut self, error: LastError) {
        self.last_error = Some(error);
    }

    pub(crate) fn count_accepted(&mut self) {
        self.accepted_events += 1;
    }

    pub(crate) fn count_dropped(&mut self) {
        self.dropped_events += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;

    #[rstest]
    #[case(Disconnected, Connecting, true)]
    #[case(Disconnected, Connected, false)]
    #[case(Disconnected, Disconnected, false)]
    #[case(Connecting, Connected, true)]
    #[case(Connecting, Scanning, false)]
    #[case(Connected, Scanning, true)]
    #[case(Connected, Connecting, false)]
    #[case(Scanning, Stopping, true)]
    #[case(Scanning, Connected, false)]
    #[case(Stopping, Connected, true)]
    #[case(Stopping, Scanning, false)]
    #[case(Connecting, Disconnected, true)]
    #[case(Connected, Disconnected, true)]
    #[case(Scanning, Disconnected, true)]
    #[case(Stopping, Disconnected, true)]
    fn test_transition_table(
        #[case] from: SessionState,
        #[case] to: SessionState,
        #[case] valid: bool,
    ) {
        assert_eq!(from.can_transition_to(&to), valid);
    }

    #[rstest]
    #[case(Disconnected, false)]
    #[case(Connecting, false)]
    #[case(Connected, false)]
    #[case(Scanning, true)]
    #[case(Stopping, true)]
    fn test_accepts_tags(#[case] state: SessionState, #[case] accepts: bool) {
        assert_eq!(state.accepts_tags(), accepts);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionState::Disconnected).unwrap(),
            "\"disconnected\""
        );
        assert_eq!(
            serde_json::to_string(&LinkStatus::Connected).unwrap(),
            "\"connected\""
        );
    }

    #[test]
    fn test_full_cycle() {
        let mut session = ReaderSession::new(Endpoint::default());
        assert_eq!(session.state(), Disconnected);
        assert!(session.started_at().is_none());

        for state in [Connecting, Connected, Scanning, Stopping, Connected] {
            session.transition_to(state).unwrap();
        }
        assert_eq!(session.state(), Connected);
        assert!(session.started_at().is_some());

        session.transition_to(Disconnected).unwrap();
        assert!(session.started_at().is_none());
        assert_eq!(session.transitions().len(), 6);
    }

    #[test]
    fn test_invalid_transition_leaves_session_unchanged() {
        let mut session = ReaderSession::new(Endpoint::default());
        let err = session.transition_to(Scanning).unwrap_err();

        assert_eq!(err.from, Disconnected);
        assert_eq!(err.to, Scanning);
        assert_eq!(session.state(), Disconnected);
        assert!(session.transitions().is_empty());
    }

    #[test]
    fn test_history_bounded() {
        let mut session = ReaderSession::new(Endpoint::default());
        for _ in 0..20 {
            session.transition_to(Connecting).unwrap();
            session.transition_to(Disconnected).unwrap();
        }

        assert_eq!(session.transitions().len(), MAX_HISTORY_SIZE);
        let last = session.transitions().back().unwrap();
        assert_eq!((last.from, last.to), (Connecting, Disconnected));
    }

    #[test]
    fn test_record_error() {
        let mut session = ReaderSession::new(Endpoint::default());
        session.record_error(LastError::new(ErrorKind::Connection, "refused"));
        assert_eq!(session.last_error().unwrap().kind, ErrorKind::Connection);
    }
}
