//! Session state shared between the controller and its event pump.
//!
//! Lock order is session then buffer. The session lock is never held across
//! an `.await`.

use std::sync::{Mutex, MutexGuard};

use readerd_core::{Endpoint, TagEvent};
use readerd_link::Liveness;
use tokio::sync::broadcast;
use tracing::info;

use crate::buffer::TagBuffer;
use crate::error::LastError;
use crate::events::{LIVE_FEED_CAPACITY, LiveEvent};
use crate::state::{InvalidTransition, LinkStatus, ReaderSession, SessionState, StateTransition};

#[derive(Debug)]
struct Inner {
    session: ReaderSession,
    liveness: Option<Liveness>,
}

#[derive(Debug)]
pub(crate) struct Shared {
    inner: Mutex<Inner>,
    buffer: TagBuffer,
    live: broadcast::Sender<LiveEvent>,
}

impl Shared {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        let (live, _) = broadcast::channel(LIVE_FEED_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                session: ReaderSession::new(endpoint),
                liveness: None,
            }),
            buffer: TagBuffer::new(),
            live,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn state(&self) -> SessionState {
        self.lock().session.state()
    }

    pub(crate) fn session(&self) -> ReaderSession {
        self.lock().session.clone()
    }

    pub(crate) fn status(&self) -> LinkStatus {
        let inner = self.lock();
        let alive = inner.liveness.as_ref().is_some_and(Liveness::is_alive);
        if alive && inner.session.state() != SessionState::Disconnected {
            LinkStatus::Connected
        } else {
            LinkStatus::Disconnected
        }
    }

    pub(crate) fn buffer(&self) -> &TagBuffer {
        &self.buffer
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.live.subscribe()
    }

    pub(crate) fn publish(&self, event: LiveEvent) {
        // No subscribers is not an error.
        let _ = self.live.send(event);
    }

    fn announce(&self, transition: &StateTransition) {
        info!(
            from = %transition.from,
            to = %transition.to,
            "Session state changed"
        );
        self.publish(LiveEvent::StateChanged {
            from: transition.from,
            to: transition.to,
        });
    }

    pub(crate) fn transition(&self, to: SessionState) -> Result<(), InvalidTransition> {
        let transition = self.lock().session.transition_to(to)?;
        self.announce(&transition);
        Ok(())
    }

    /// Enter `Connected` with the liveness of the new connection.
    pub(crate) fn attach(&self, liveness: Liveness) -> Result<(), InvalidTransition> {
        let transition = {
            let mut inner = self.lock();
            let transition = inner.session.transition_to(SessionState::Connected)?;
            inner.liveness = Some(liveness);
            transition
        };
        self.announce(&transition);
        Ok(())
    }

    /// `Scanning → Stopping`, or the state that prevented it.
    pub(crate) fn begin_stop(&self) -> Result<(), SessionState> {
        let transition = {
            let mut inner = self.lock();
            let state = inner.session.state();
            if state != SessionState::Scanning {
                return Err(state);
            }
            inner
                .session
                .transition_to(SessionState::Stopping)
                .map_err(|_| state)?
        };
        self.announce(&transition);
        Ok(())
    }

    /// Close the grace window: snapshot the buffer and enter `Connected`.
    ///
    /// Both happen under the session lock, so no read is recorded between
    /// the snapshot and the transition.
    pub(crate) fn finish_stop(&self) -> Result<Vec<TagEvent>, SessionState> {
        let (snapshot, transition) = {
            let mut inner = self.lock();
            let state = inner.session.state();
            if state != SessionState::Stopping {
                return Err(state);
            }
            let snapshot = self.buffer.snapshot();
            let transition = inner
                .session
                .transition_to(SessionState::Connected)
                .map_err(|_| state)?;
            (snapshot, transition)
        };
        self.announce(&transition);
        Ok(snapshot)
    }

    /// Record `event` if the session is taking reads.
    ///
    /// Returns the state that refused it otherwise. Either way the read is
    /// counted on the session.
    pub(crate) fn accept_tag(&self, event: &TagEvent) -> Result<(), SessionState> {
        let mut inner = self.lock();
        let state = inner.session.state();
        if state.accepts_tags() {
            self.buffer.record(event.clone());
            inner.session.count_accepted();
            Ok(())
        } else {
            inner.session.count_dropped();
            Err(state)
        }
    }

    /// Drop the link and enter `Disconnected` from wherever the session is.
    pub(crate) fn force_disconnected(&self, error: Option<LastError>) {
        let transition = {
            let mut inner = self.lock();
            if let Some(error) = error {
                inner.session.record_error(error);
            }
            inner.liveness = None;
            if inner.session.state() == SessionState::Disconnected {
                None
            } else {
                inner.session.transition_to(SessionState::Disconnected).ok()
            }
        };
        if let Some(transition) = transition {
            self.announce(&transition);
        }
    }
}
