//! Programmable mock reader link.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use readerd_core::Endpoint;
use readerd_core::constants::DEFAULT_EVENT_CAPACITY;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{LinkError, Result};
use crate::traits::{Ack, Command, CommandKind, DeviceEvent, DeviceLink, Liveness};

#[derive(Debug, Clone)]
struct Rejection {
    code: u16,
    description: String,
}

#[derive(Debug)]
struct Live {
    id: u64,
    events_tx: mpsc::Sender<DeviceEvent>,
    liveness: Liveness,
}

#[derive(Debug, Default)]
struct MockState {
    unreachable: bool,
    connect_delay: Option<Duration>,
    ack_delay: Option<Duration>,
    rejections: HashMap<CommandKind, Rejection>,
    silent: HashSet<CommandKind>,
    fail_close: bool,
    before_stop_ack: Vec<DeviceEvent>,
    commands: Vec<Command>,
    scanning: bool,
    connects: usize,
    closes: usize,
    next_id: u64,
    live: Option<Live>,
}

type Shared = Arc<Mutex<MockState>>;

fn lock(state: &Shared) -> MutexGuard<'_, MockState> {
    // A poisoned mock only means a test already panicked.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock reader link.
///
/// # Examples
///
/// ```
/// use readerd_core::Endpoint;
/// use readerd_link::mock::MockLink;
/// use readerd_link::{Command, CommandKind, DeviceLink, LinkError};
///
/// #[tokio::main]
/// async fn main() {
///     let (link, control) = MockLink::new();
///     control.reject(CommandKind::StartInventory, 100, "antenna fault");
///
///     let mut conn = link.connect(&Endpoint::default()).await.unwrap();
///     let err = link
///         .send_command(&mut conn, Command::StartInventory { rospec_id: 1 })
///         .await
///         .unwrap_err();
///     assert!(matches!(err, LinkError::Rejected { code: 100, .. }));
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockLink {
    state: Shared,
    event_capacity: usize,
}

impl MockLink {
    /// Create a mock link and the handle that controls it.
    pub fn new() -> (Self, MockLinkHandle) {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(capacity: usize) -> (Self, MockLinkHandle) {
        let state: Shared = Arc::new(Mutex::new(MockState::default()));
        let link = Self {
            state: Arc::clone(&state),
            event_capacity: capacity.max(1),
        };
        (link, MockLinkHandle { state })
    }
}

/// One mock connection.
#[derive(Debug)]
pub struct MockConnection {
    id: u64,
    events_rx: Option<mpsc::Receiver<DeviceEvent>>,
    liveness: Liveness,
}

impl MockConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }
}

impl DeviceLink for MockLink {
    type Handle = MockConnection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<MockConnection> {
        let delay = lock(&self.state).connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if state.unreachable {
            return Err(LinkError::Unreachable {
                endpoint: endpoint.to_string(),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            });
        }

        state.next_id += 1;
        state.connects += 1;
        state.scanning = false;
        let (events_tx, events_rx) = mpsc::channel(self.event_capacity);
        let liveness = Liveness::alive();
        let id = state.next_id;
        if let Some(previous) = state.live.replace(Live {
            id,
            events_tx,
            liveness: liveness.clone(),
        }) {
            previous.liveness.mark_dead();
        }

        debug!(%endpoint, id, "Mock reader connected");
        Ok(MockConnection {
            id,
            events_rx: Some(events_rx),
            liveness,
        })
    }

    async fn send_command(&self, handle: &mut MockConnection, command: Command) -> Result<Ack> {
        if !handle.liveness.is_alive() {
            return Err(LinkError::connection_lost("mock connection dropped"));
        }

        let kind = command.kind();
        let (delay, silent, rejection) = {
            let mut state = lock(&self.state);
            state.commands.push(command);
            (
                state.ack_delay,
                state.silent.contains(&kind),
                state.rejections.get(&kind).cloned(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if silent {
            std::future::pending::<()>().await;
        }
        if let Some(rejection) = rejection {
            return Err(LinkError::rejected(kind, rejection.code, rejection.description));
        }

        match command {
            Command::StartInventory { .. } => lock(&self.state).scanning = true,
            Command::StopInventory { .. } => {
                let (queued, tx) = {
                    let mut state = lock(&self.state);
                    state.scanning = false;
                    let tx = state.live.as_ref().map(|live| live.events_tx.clone());
                    (std::mem::take(&mut state.before_stop_ack), tx)
                };
                // Reports the reader flushed before answering the stop.
                if let Some(tx) = tx {
                    for event in queued {
                        let _ = tx.send(event).await;
                    }
                }
            }
            Command::Reset | Command::CloseConnection => {}
        }

        Ok(Ack::new(handle.id as u32))
    }

    fn subscribe(&self, handle: &mut MockConnection) -> Result<mpsc::Receiver<DeviceEvent>> {
        handle.events_rx.take().ok_or(LinkError::AlreadySubscribed)
    }

    async fn close(&self, handle: MockConnection) -> Result<()> {
        handle.liveness.mark_dead();

        let mut state = lock(&self.state);
        state.closes += 1;
        state.scanning = false;
        if state.live.as_ref().is_some_and(|live| live.id == handle.id) {
            state.live = None;
        }

        if state.fail_close {
            return Err(LinkError::Io(std::io::Error::other("mock close failure")));
        }
        Ok(())
    }

    fn liveness(&self, handle: &MockConnection) -> Liveness {
        handle.liveness()
    }
}

/// Handle for controlling a [`MockLink`].
///
/// Clones share the same mock.
#[derive(Debug, Clone)]
pub struct MockLinkHandle {
    state: Shared,
}

impl MockLinkHandle {
    /// Make future connection attempts fail as unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        lock(&self.state).unreachable = unreachable;
    }

    /// Delay every connection attempt.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        lock(&self.state).connect_delay = delay;
    }

    /// Delay every command acknowledgement.
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        lock(&self.state).ack_delay = delay;
    }

    /// Answer `kind` with a failure status until [`accept`](Self::accept).
    pub fn reject(&self, kind: CommandKind, code: u16, description: impl Into<String>) {
        lock(&self.state).rejections.insert(
            kind,
            Rejection {
                code,
                description: description.into(),
            },
        );
    }

    /// Never answer `kind` until [`accept`](Self::accept).
    pub fn ignore(&self, kind: CommandKind) {
        lock(&self.state).silent.insert(kind);
    }

    /// Answer `kind` normally again.
    pub fn accept(&self, kind: CommandKind) {
        let mut state = lock(&self.state);
        state.rejections.remove(&kind);
        state.silent.remove(&kind);
    }

    /// Make `close` report a failure. The connection is gone regardless.
    pub fn set_fail_close(&self, fail: bool) {
        lock(&self.state).fail_close = fail;
    }

    /// Deliver `event` right before the next stop acknowledgement.
    pub fn queue_before_stop_ack(&self, event: DeviceEvent) {
        lock(&self.state).before_stop_ack.push(event);
    }

    /// Deliver `event` on the live connection.
    ///
    /// Returns `false` if there is no live connection or nobody listens.
    pub async fn emit(&self, event: DeviceEvent) -> bool {
        let tx = lock(&self.state)
            .live
            .as_ref()
            .map(|live| live.events_tx.clone());
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Simulate the reader going away.
    ///
    /// The connection is marked dead and its subscriber receives
    /// `ConnectionLost`.
    pub async fn drop_connection(&self, reason: impl Into<String>) -> bool {
        let live = lock(&self.state).live.take();
        match live {
            Some(live) => {
                live.liveness.mark_dead();
                lock(&self.state).scanning = false;
                live.events_tx
                    .send(DeviceEvent::ConnectionLost {
                        reason: reason.into(),
                    })
                    .await
                    .is_ok()
            }
            None => false,
        }
    }

    /// Commands received so far, oldest first.
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.state).commands.clone()
    }

    /// Whether the mock reader is running inventory.
    pub fn is_scanning(&self) -> bool {
        lock(&self.state).scanning
    }

    /// Whether a connection is open.
    pub fn is_connected(&self) -> bool {
        lock(&self.state).live.is_some()
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.state).connects
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).closes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use readerd_core::{AntennaId, TagEvent, TagId};

    fn tag(byte: u8) -> DeviceEvent {
        DeviceEvent::TagRead(TagEvent::new(
            TagId::new(vec![0xE2, byte]).unwrap(),
            AntennaId::new(1),
            Utc::now(),
        ))
    }

    #[tokio::test]
    async fn test_mock_connect_and_command_log() {
        let (link, control) = MockLink::new();
        let mut conn = link.connect(&Endpoint::default()).await.unwrap();
        assert!(control.is_connected());

        link.send_command(&mut conn, Command::Reset).await.unwrap();
        link.send_command(&mut conn, Command::StartInventory { rospec_id: 1 })
            .await
            .unwrap();
        assert!(control.is_scanning());

        assert_eq!(
            control.commands(),
            vec![Command::Reset, Command::StartInventory { rospec_id: 1 }]
        );
    }

    #[tokio::test]
    async fn test_mock_unreachable() {
        let (link, control) = MockLink::new();
        control.set_unreachable(true);

        let err = link.connect(&Endpoint::default()).await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(control.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_reject_then_accept() {
        let (link, control) = MockLink::new();
        let mut conn = link.connect(&Endpoint::default()).await.unwrap();

        control.reject(CommandKind::StopInventory, 401, "not running");
        let err = link
            .send_command(&mut conn, Command::StopInventory { rospec_id: 1 })
            .await
            .unwrap_err();
        assert!(!err.is_connection());

        control.accept(CommandKind::StopInventory);
        link.send_command(&mut conn, Command::StopInventory { rospec_id: 1 })
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_ignored_command_never_acks() {
        let (link, control) = MockLink::new();
        let mut conn = link.connect(&Endpoint::default()).await.unwrap();
        control.ignore(CommandKind::StartInventory);

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            link.send_command(&mut conn, Command::StartInventory { rospec_id: 1 }),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mock_events_before_stop_ack() {
        let (link, control) = MockLink::new();
        let mut conn = link.connect(&Endpoint::default()).await.unwrap();
        let mut events = link.subscribe(&mut conn).unwrap();

        control.queue_before_stop_ack(tag(1));
        control.queue_before_stop_ack(tag(2));
        link.send_command(&mut conn, Command::StopInventory { rospec_id: 1 })
            .await
            .unwrap();

        assert_eq!(events.try_recv().unwrap(), tag(1));
        assert_eq!(events.try_recv().unwrap(), tag(2));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mock_subscribe_once() {
        let (link, _control) = MockLink::new();
        let mut conn = link.connect(&Endpoint::default()).await.unwrap();

        assert!(link.subscribe(&mut conn).is_ok());
        assert!(matches!(
            link.subscribe(&mut conn),
            Err(LinkError::AlreadySubscribed)
        ));
    }

    #[tokio::test]
    async fn test_mock_drop_connection() {
        let (link, control) = MockLink::new();
        let mut conn = link.connect(&Endpoint::default()).await.unwrap();
        let mut events = link.subscribe(&mut conn).unwrap();

        assert!(control.drop_connection("cable pulled").await);
        assert!(!link.is_alive(&conn));
        assert!(matches!(
            events.recv().await,
            Some(DeviceEvent::ConnectionLost { .. })
        ));

        let err = link.send_command(&mut conn, Command::Reset).await.unwrap_err();
        assert!(matches!(err, LinkError::ConnectionLost { .. }));
    }

    #[tokio::test]
    async fn test_mock_close_failure_still_closes() {
        let (link, control) = MockLink::new();
        let conn = link.connect(&Endpoint::default()).await.unwrap();
        let liveness = link.liveness(&conn);
        control.set_fail_close(true);

        assert!(link.close(conn).await.is_err());
        assert!(!liveness.is_alive());
        assert!(!control.is_connected());
        assert_eq!(control.close_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_emit_without_connection() {
        let (_link, control) = MockLink::new();
        assert!(!control.emit(tag(1)).await);
    }
}
