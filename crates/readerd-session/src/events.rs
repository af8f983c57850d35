//! Live feed of what a session observes.

use readerd_core::{AntennaId, TagEvent};
use serde::Serialize;

use crate::state::SessionState;

/// Capacity of the live feed; slower subscribers see `Lagged`.
pub(crate) const LIVE_FEED_CAPACITY: usize = 1024;

/// Event published to [`SessionController::subscribe`] receivers.
///
/// [`SessionController::subscribe`]: crate::SessionController::subscribe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LiveEvent {
    /// A tag read was recorded in the buffer.
    TagRead(TagEvent),

    /// A general purpose input changed level.
    Gpi { port: u16, high: bool },

    /// An antenna was plugged or unplugged.
    Antenna { antenna: AntennaId, connected: bool },

    /// The session changed state.
    StateChanged { from: SessionState, to: SessionState },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_event_json_shape() {
        let event = LiveEvent::StateChanged {
            from: SessionState::Connected,
            to: SessionState::Scanning,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["to"], "scanning");

        let json = serde_json::to_value(LiveEvent::Gpi { port: 1, high: true }).unwrap();
        assert_eq!(json["event"], "gpi");
        assert_eq!(json["port"], 1);
    }
}
