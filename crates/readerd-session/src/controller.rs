//! Reader session controller.
//!
//! # Architecture
//!
//! ```text
//! start/stop/disconnect ──> op lock (tokio Mutex) ──> DeviceLink ──> Reader
//!                                  │                                  │
//!                                  │ owns handle + pump               │ events
//!                                  ▼                                  ▼
//! state/status/session ──> Shared (std Mutex) <──── Pump <──── mpsc<DeviceEvent>
//!                                  │
//!                                  └──> TagBuffer, live feed
//! ```
//!
//! Lifecycle operations are serialized by the op lock, which also owns the
//! live connection. Reads of the session never wait on the op lock, so
//! `state()` and `status()` answer immediately even while a start is
//! connecting.

use std::sync::{Arc, Mutex};

use readerd_core::TagEvent;
use readerd_link::{Command, DeviceLink};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::buffer::{TagBuffer, TagSummary};
use crate::config::SessionConfig;
use crate::error::{LastError, Result, SessionError, TeardownWarning};
use crate::events::LiveEvent;
use crate::pump::Pump;
use crate::shared::Shared;
use crate::state::{LinkStatus, ReaderSession, SessionState};

/// Live connection owned by the op lock.
struct Active<H> {
    handle: H,
    pump: Pump,
}

/// Forces the session to `Disconnected` if an operation future is dropped
/// before it finishes.
struct DisconnectOnDrop<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl<'a> DisconnectOnDrop<'a> {
    fn arm(shared: &'a Shared) -> Self {
        Self {
            shared,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DisconnectOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            info!("Session operation abandoned, forcing disconnect");
            self.shared
                .force_disconnected(Some(LastError::from(&SessionError::Cancelled)));
        }
    }
}

/// Controls one reader connection and its inventory.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
///
/// # Examples
///
/// ```
/// use readerd_link::mock::MockLink;
/// use readerd_session::{SessionConfig, SessionController, SessionState};
///
/// #[tokio::main]
/// async fn main() -> readerd_session::Result<()> {
///     let (link, _control) = MockLink::new();
///     let controller = SessionController::new(link, SessionConfig::default());
///
///     controller.start().await?;
///     assert_eq!(controller.state(), SessionState::Scanning);
///
///     let tags = controller.stop().await?;
///     assert!(tags.is_empty());
///     assert_eq!(controller.state(), SessionState::Connected);
///
///     controller.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct SessionController<L: DeviceLink> {
    link: L,
    config: SessionConfig,
    shared: Arc<Shared>,
    active: tokio::sync::Mutex<Option<Active<L::Handle>>>,
    shutdown: CancellationToken,
    /// Shared by every start or connect armed since the last disconnect.
    pending_starts: Mutex<CancellationToken>,
}

impl<L: DeviceLink> SessionController<L> {
    /// Create a disconnected controller.
    pub fn new(link: L, config: SessionConfig) -> Self {
        debug!(endpoint = %config.endpoint, "Creating session controller");
        let shutdown = CancellationToken::new();
        Self {
            link,
            shared: Arc::new(Shared::new(config.endpoint.clone())),
            config,
            active: tokio::sync::Mutex::new(None),
            pending_starts: Mutex::new(shutdown.child_token()),
            shutdown,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect if needed and start inventory.
    ///
    /// Valid from `Disconnected` and `Connected`. A reset is sent first on
    /// a fresh connection when `reset_on_connect` is set. Tag reads are
    /// recorded from the moment this returns `Ok`.
    ///
    /// # Errors
    ///
    /// - `SessionError::AlreadyScanning` if inventory is running; state is
    ///   unchanged
    /// - `SessionError::Connection` if the reader cannot be reached within
    ///   the connect timeout or the link drops while starting
    /// - `SessionError::Device` if the reader rejects or does not
    ///   acknowledge a command in time
    /// - `SessionError::Cancelled` if `shutdown` or `disconnect` aborted it
    ///
    /// On every error except `AlreadyScanning` the session ends up
    /// `Disconnected` with the error recorded. Dropping the returned future
    /// has the same effect as cancelling it.
    pub async fn start(&self) -> Result<()> {
        let cancel = self.arm_pending_start();

        let mut slot = self.active.lock().await;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.bring_up(&mut slot) => Some(result),
        };

        match outcome {
            Some(result) => result,
            None => Err(self.abandon(&mut slot).await),
        }
    }

    /// Establish the physical connection without starting inventory.
    ///
    /// A no-op while already connected or scanning. Needed before a GPI
    /// trigger can see any input changes.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start), minus `AlreadyScanning`.
    pub async fn connect(&self) -> Result<()> {
        let cancel = self.arm_pending_start();

        let mut slot = self.active.lock().await;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.link_up(&mut slot) => Some(result),
        };

        match outcome {
            Some(result) => result,
            None => Err(self.abandon(&mut slot).await),
        }
    }

    /// Stop inventory and return the tag buffer.
    ///
    /// Reads the reader delivered before acknowledging the stop are
    /// included; reads after it are dropped.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotScanning` from any state but `Scanning`; state
    ///   is unchanged
    /// - `SessionError::Device` if the reader rejects or does not
    ///   acknowledge the stop; the connection is torn down
    /// - `SessionError::Connection` if the link drops while stopping
    pub async fn stop(&self) -> Result<Vec<TagEvent>> {
        let mut slot = self.active.lock().await;

        if let Err(state) = self.shared.begin_stop() {
            debug!(%state, "Stop ignored, not scanning");
            return Err(SessionError::NotScanning { state });
        }

        let guard = DisconnectOnDrop::arm(&self.shared);
        let result = self.wind_down(&mut slot).await;
        guard.disarm();
        result
    }

    /// Tear down the connection. Always succeeds.
    ///
    /// Every `start` or `connect` still pending when this is called is
    /// cancelled, including ones queued behind another. If inventory is
    /// running it is stopped first, best effort. Close failures are logged
    /// as teardown warnings.
    pub async fn disconnect(&self) {
        let fresh = self.shutdown.child_token();
        std::mem::replace(&mut *lock(&self.pending_starts), fresh).cancel();

        let mut slot = self.active.lock().await;
        if let Some(mut active) = slot.take() {
            if self.shared.state() == SessionState::Scanning && self.link.is_alive(&active.handle)
            {
                let stop = Command::StopInventory {
                    rospec_id: self.config.rospec_id,
                };
                if let Err(e) = self.command(&mut active, stop).await {
                    TeardownWarning::new(
                        self.config.endpoint.clone(),
                        format!("Stop before disconnect failed: {e}"),
                    )
                    .emit();
                }
            }
            self.teardown(active).await;
        }

        self.shared.force_disconnected(None);
        info!(endpoint = %self.config.endpoint, "Disconnected from reader");
    }

    /// Cancel any pending start and disconnect.
    ///
    /// Terminal: later calls to `start` fail with `Cancelled`.
    pub async fn shutdown(&self) {
        info!(endpoint = %self.config.endpoint, "Shutting down reader session");
        self.shutdown.cancel();
        self.disconnect().await;
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Exact lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Whether the physical link is up, regardless of inventory.
    pub fn status(&self) -> LinkStatus {
        self.shared.status()
    }

    /// Copy of the session record.
    pub fn session(&self) -> ReaderSession {
        self.shared.session()
    }

    /// Newest read per tag, ordered by tag id.
    pub fn snapshot(&self) -> Vec<TagEvent> {
        self.shared.buffer().snapshot()
    }

    /// Every recorded read, oldest first.
    pub fn audit(&self) -> Vec<TagEvent> {
        self.shared.buffer().audit()
    }

    pub fn summary(&self) -> Vec<TagSummary> {
        self.shared.buffer().summary()
    }

    /// Empty the tag buffer. Session state is not affected.
    pub fn clear(&self) {
        self.shared.buffer().clear();
        debug!("Tag buffer cleared");
    }

    pub fn buffer(&self) -> &TagBuffer {
        self.shared.buffer()
    }

    /// Live feed of recorded reads, reader notifications and state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.shared.subscribe()
    }

    fn arm_pending_start(&self) -> CancellationToken {
        lock(&self.pending_starts).clone()
    }

    /// Cancelled start or connect: drop whatever was set up.
    async fn abandon(&self, slot: &mut Option<Active<L::Handle>>) -> SessionError {
        info!(endpoint = %self.config.endpoint, "Pending start cancelled");
        if let Some(active) = slot.take() {
            self.teardown(active).await;
        }
        self.shared
            .force_disconnected(Some(LastError::from(&SessionError::Cancelled)));
        SessionError::Cancelled
    }

    async fn bring_up(&self, slot: &mut Option<Active<L::Handle>>) -> Result<()> {
        if self.shared.state() == SessionState::Scanning {
            return Err(SessionError::AlreadyScanning);
        }

        let guard = DisconnectOnDrop::arm(&self.shared);
        let result = self.try_bring_up(slot).await;
        guard.disarm();
        result
    }

    async fn try_bring_up(&self, slot: &mut Option<Active<L::Handle>>) -> Result<()> {
        let mut active = self.ensure_connected(slot).await?;

        let start = Command::StartInventory {
            rospec_id: self.config.rospec_id,
        };
        if let Err(e) = self.command(&mut active, start).await {
            return Err(self.fail(Some(active), e).await);
        }

        if let Err(e) = self.shared.transition(SessionState::Scanning) {
            let err = SessionError::connection(format!("Link lost while starting inventory ({e})"));
            return Err(self.fail(Some(active), err).await);
        }

        info!(
            endpoint = %self.config.endpoint,
            rospec_id = self.config.rospec_id,
            "Inventory started"
        );
        *slot = Some(active);
        Ok(())
    }

    async fn link_up(&self, slot: &mut Option<Active<L::Handle>>) -> Result<()> {
        if self.shared.state() == SessionState::Scanning {
            return Ok(());
        }

        let guard = DisconnectOnDrop::arm(&self.shared);
        let result = self.ensure_connected(slot).await;
        guard.disarm();
        *slot = Some(result?);
        Ok(())
    }

    /// Reuse the live connection in `slot`, or open a new one.
    ///
    /// The slot is left empty; the caller puts the connection back.
    async fn ensure_connected(
        &self,
        slot: &mut Option<Active<L::Handle>>,
    ) -> Result<Active<L::Handle>> {
        match slot.take() {
            Some(active)
                if self.shared.state() == SessionState::Connected
                    && self.link.is_alive(&active.handle) =>
            {
                return Ok(active);
            }
            Some(stale) => {
                debug!("Discarding stale reader connection");
                self.teardown(stale).await;
                self.shared.force_disconnected(None);
            }
            None => self.shared.force_disconnected(None),
        }

        let mut active = self.open().await?;
        if self.config.reset_on_connect {
            if let Err(e) = self.command(&mut active, Command::Reset).await {
                return Err(self.fail(Some(active), e).await);
            }
        }
        Ok(active)
    }

    async fn open(&self) -> Result<Active<L::Handle>> {
        let endpoint = &self.config.endpoint;
        self.shared
            .transition(SessionState::Connecting)
            .map_err(|e| SessionError::connection(e.to_string()))?;

        let timeout = self.config.connect_timeout();
        let mut handle = match tokio::time::timeout(timeout, self.link.connect(endpoint)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(self.fail(None, e.into()).await),
            Err(_) => {
                let err = SessionError::connection(format!(
                    "Connecting to {endpoint} timed out after {}ms",
                    timeout.as_millis()
                ));
                return Err(self.fail(None, err).await);
            }
        };

        let events = match self.link.subscribe(&mut handle) {
            Ok(events) => events,
            Err(e) => {
                self.close_handle(handle).await;
                return Err(self.fail(None, e.into()).await);
            }
        };

        let liveness = self.link.liveness(&handle);
        let active = Active {
            pump: Pump::spawn(Arc::clone(&self.shared), events),
            handle,
        };

        if let Err(e) = self.shared.attach(liveness) {
            let err = SessionError::connection(format!("Link lost while connecting ({e})"));
            return Err(self.fail(Some(active), err).await);
        }

        info!(%endpoint, "Connected to reader");
        Ok(active)
    }

    async fn wind_down(&self, slot: &mut Option<Active<L::Handle>>) -> Result<Vec<TagEvent>> {
        let Some(mut active) = slot.take() else {
            let err = SessionError::connection("No reader connection");
            return Err(self.fail(None, err).await);
        };

        let stop = Command::StopInventory {
            rospec_id: self.config.rospec_id,
        };
        if let Err(e) = self.command(&mut active, stop).await {
            return Err(self.fail(Some(active), e).await);
        }

        // Everything the reader sent before the acknowledgement is queued
        // by now; record it before closing the window.
        active.pump.flush().await;

        match self.shared.finish_stop() {
            Ok(snapshot) => {
                info!(
                    endpoint = %self.config.endpoint,
                    tags = snapshot.len(),
                    "Inventory stopped"
                );
                *slot = Some(active);
                Ok(snapshot)
            }
            Err(state) => {
                let err = SessionError::connection(format!(
                    "Link lost while stopping inventory (state: {state})"
                ));
                Err(self.fail(Some(active), err).await)
            }
        }
    }

    async fn command(&self, active: &mut Active<L::Handle>, command: Command) -> Result<()> {
        let timeout = self.config.command_timeout();
        debug!(command = %command.kind(), "Sending reader command");

        match tokio::time::timeout(timeout, self.link.send_command(&mut active.handle, command))
            .await
        {
            Ok(Ok(_ack)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SessionError::device(format!(
                "{} not acknowledged within {}ms",
                command.kind(),
                timeout.as_millis()
            ))),
        }
    }

    /// Record `err`, tear down, and enter `Disconnected`.
    async fn fail(&self, active: Option<Active<L::Handle>>, err: SessionError) -> SessionError {
        error!(endpoint = %self.config.endpoint, error = %err, "Reader session operation failed");
        if let Some(active) = active {
            self.teardown(active).await;
        }
        self.shared.force_disconnected(Some(LastError::from(&err)));
        err
    }

    async fn teardown(&self, active: Active<L::Handle>) {
        let Active { handle, pump } = active;
        drop(pump);
        self.close_handle(handle).await;
    }

    async fn close_handle(&self, handle: L::Handle) {
        if let Err(e) = self.link.close(handle).await {
            TeardownWarning::new(self.config.endpoint.clone(), e.to_string()).emit();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
