//! TCP Device Link speaking the reader protocol.
//!
//! # Architecture
//!
//! ```text
//! SessionController
//!     │
//!     └─> TcpLink::send_command ──(FramedWrite)──> Reader
//!                 ▲                                  │
//!                 │ oneshot by message id            │
//!                 └──── read task <──(FramedRead)────┘
//!                          │
//!                          └─> mpsc<DeviceEvent> ──> event pump
//! ```
//!
//! Each connection owns one background read task. It routes responses to
//! the command waiting on the same message id, forwards tag reports and
//! reader notifications to the subscriber, answers keepalives, and marks the
//! connection dead when the stream ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use readerd_core::{AntennaId, Endpoint};
use readerd_core::constants::{DEFAULT_EVENT_CAPACITY, TEARDOWN_TIMEOUT_MS};
use readerd_protocol::{Message, MessageBody, MessageType, ReaderCodec, ReaderEvent};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};

use crate::error::{LinkError, Result};
use crate::traits::{Ack, Command, DeviceEvent, DeviceLink, Liveness};

type Writer = Arc<tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, ReaderCodec>>>;
type Pending = Arc<Mutex<HashMap<u32, oneshot::Sender<Message>>>>;

/// Device Link over TCP.
///
/// # Example
///
/// ```no_run
/// use readerd_core::{AntennaId, Endpoint};
/// use readerd_link::{Command, DeviceLink, TcpLink};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let link = TcpLink::new();
/// let endpoint: Endpoint = "192.168.1.50:5084".parse()?;
///
/// let mut conn = link.connect(&endpoint).await?;
/// let mut events = link.subscribe(&mut conn)?;
/// link.send_command(&mut conn, Command::StartInventory { rospec_id: 1 }).await?;
///
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpLink {
    event_capacity: usize,
}

impl TcpLink {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Link whose connections buffer up to `capacity` undelivered events.
    pub fn with_event_capacity(capacity: usize) -> Self {
        Self {
            event_capacity: capacity.max(1),
        }
    }

    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }
}

impl Default for TcpLink {
    fn default() -> Self {
        Self::new()
    }
}

/// One TCP connection to a reader.
#[derive(Debug)]
pub struct TcpConnection {
    endpoint: Endpoint,
    writer: Writer,
    pending: Pending,
    next_id: u32,
    events_rx: Option<mpsc::Receiver<DeviceEvent>>,
    liveness: Liveness,
    read_task: JoinHandle<()>,
}

impl TcpConnection {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    fn next_message_id(&mut self) -> u32 {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.next_id
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        if self.liveness.is_alive() {
            debug!(endpoint = %self.endpoint, "TcpConnection dropped while open");
        }
        self.read_task.abort();
        self.liveness.mark_dead();
    }
}

/// Removes a pending entry when the waiting command goes away.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

impl DeviceLink for TcpLink {
    type Handle = TcpConnection;

    async fn connect(&self, endpoint: &Endpoint) -> Result<TcpConnection> {
        info!(%endpoint, "Connecting to reader");

        let stream = TcpStream::connect((endpoint.host(), endpoint.port()))
            .await
            .map_err(|source| LinkError::Unreachable {
                endpoint: endpoint.to_string(),
                source,
            })?;

        // Command acknowledgements are small and latency bound.
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        let (read_half, write_half) = stream.into_split();
        let writer: Writer = Arc::new(tokio::sync::Mutex::new(FramedWrite::new(
            write_half,
            ReaderCodec::new(),
        )));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, events_rx) = mpsc::channel(self.event_capacity);
        let liveness = Liveness::alive();

        let read_task = tokio::spawn(read_loop(
            FramedRead::new(read_half, ReaderCodec::new()),
            ReadContext {
                endpoint: endpoint.clone(),
                writer: Arc::clone(&writer),
                pending: Arc::clone(&pending),
                events_tx,
                liveness: liveness.clone(),
            },
        ));

        info!(%endpoint, "Connected to reader");
        Ok(TcpConnection {
            endpoint: endpoint.clone(),
            writer,
            pending,
            next_id: 0,
            events_rx: Some(events_rx),
            liveness,
            read_task,
        })
    }

    async fn send_command(&self, handle: &mut TcpConnection, command: Command) -> Result<Ack> {
        if !handle.liveness.is_alive() {
            return Err(LinkError::connection_lost("connection already closed"));
        }

        let id = handle.next_message_id();
        let (tx, rx) = oneshot::channel();
        lock_pending(&handle.pending)?.insert(id, tx);
        let _guard = PendingGuard {
            pending: &handle.pending,
            id,
        };

        debug!(endpoint = %handle.endpoint, id, command = %command.kind(), "Sending command");
        handle
            .writer
            .lock()
            .await
            .send(Message::new(id, request_body(command)))
            .await?;

        let response = rx
            .await
            .map_err(|_| LinkError::connection_lost("connection closed awaiting response"))?;

        check_response(command, response)
    }

    fn subscribe(&self, handle: &mut TcpConnection) -> Result<mpsc::Receiver<DeviceEvent>> {
        handle.events_rx.take().ok_or(LinkError::AlreadySubscribed)
    }

    async fn close(&self, mut handle: TcpConnection) -> Result<()> {
        let step = Duration::from_millis(TEARDOWN_TIMEOUT_MS);
        info!(endpoint = %handle.endpoint, "Closing connection to reader");

        let mut first_error = None;

        if handle.liveness.is_alive() {
            let request = self.send_command(&mut handle, Command::CloseConnection);
            match tokio::time::timeout(step, request).await {
                Ok(Ok(_)) => debug!("Reader acknowledged close"),
                Ok(Err(e)) => {
                    warn!("Close request failed: {}", e);
                    first_error.get_or_insert(e);
                }
                Err(_) => warn!("Close request timeout ({}ms)", step.as_millis()),
            }
        }

        // Stop routing before the stream is shut down so the closing side
        // does not report its own EOF as link loss.
        handle.read_task.abort();
        handle.liveness.mark_dead();

        let mut writer = handle.writer.lock().await;
        match tokio::time::timeout(step, writer.flush()).await {
            Ok(Ok(())) => debug!("Flush completed successfully"),
            Ok(Err(e)) => {
                warn!("Error flushing during close: {}", e);
                first_error.get_or_insert(e.into());
            }
            Err(_) => warn!("Flush timeout during close ({}ms)", step.as_millis()),
        }

        match tokio::time::timeout(step, writer.get_mut().shutdown()).await {
            Ok(Ok(())) => debug!("Shutdown completed successfully"),
            Ok(Err(e)) => {
                warn!("Error during shutdown: {}", e);
                first_error.get_or_insert(e.into());
            }
            Err(_) => warn!("Shutdown timeout during close ({}ms)", step.as_millis()),
        }
        drop(writer);

        debug!("Connection closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn liveness(&self, handle: &TcpConnection) -> Liveness {
        handle.liveness()
    }
}

fn lock_pending(
    pending: &Pending,
) -> Result<std::sync::MutexGuard<'_, HashMap<u32, oneshot::Sender<Message>>>> {
    pending
        .lock()
        .map_err(|_| LinkError::connection_lost("response router poisoned"))
}

fn request_body(command: Command) -> MessageBody {
    match command {
        Command::Reset => MessageBody::SetReaderConfig {
            reset_to_factory_default: true,
        },
        Command::StartInventory { rospec_id } => MessageBody::StartRospec { rospec_id },
        Command::StopInventory { rospec_id } => MessageBody::StopRospec { rospec_id },
        Command::CloseConnection => MessageBody::CloseConnection,
    }
}

fn expected_response(command: Command) -> Option<MessageType> {
    MessageType::try_from(request_body(command).type_code())
        .ok()
        .and_then(MessageType::response_type)
}

fn check_response(command: Command, response: Message) -> Result<Ack> {
    let kind = command.kind();

    match &response.body {
        MessageBody::ErrorMessage(status) => {
            return Err(LinkError::rejected(kind, status.code, status.description.clone()));
        }
        MessageBody::Malformed { message_type, .. } => {
            return Err(LinkError::UnexpectedResponse {
                command: kind,
                message_type: *message_type,
            });
        }
        _ => {}
    }

    if response.message_type() != expected_response(command) {
        return Err(LinkError::UnexpectedResponse {
            command: kind,
            message_type: response.body.type_code(),
        });
    }

    match response.body.status() {
        Some(status) if !status.is_success() => Err(LinkError::rejected(
            kind,
            status.code,
            status.description.clone(),
        )),
        _ => Ok(Ack::new(response.id)),
    }
}

struct ReadContext {
    endpoint: Endpoint,
    writer: Writer,
    pending: Pending,
    events_tx: mpsc::Sender<DeviceEvent>,
    liveness: Liveness,
}

async fn read_loop(mut frames: FramedRead<OwnedReadHalf, ReaderCodec>, ctx: ReadContext) {
    let reason = loop {
        match frames.next().await {
            Some(Ok(message)) => ctx.dispatch(message).await,
            Some(Err(e)) => break format!("protocol error: {e}"),
            None => break "connection closed by reader".to_string(),
        }
    };

    warn!(endpoint = %ctx.endpoint, %reason, "Reader link lost");
    ctx.liveness.mark_dead();
    if let Ok(mut pending) = ctx.pending.lock() {
        // Dropping the senders fails every waiting command.
        pending.clear();
    }
    let _ = ctx.events_tx.send(DeviceEvent::ConnectionLost { reason }).await;
}

impl ReadContext {
    async fn dispatch(&self, message: Message) {
        trace!(id = message.id, message_type = message.body.type_code(), "Frame received");

        match message.body {
            MessageBody::RoAccessReport(tags) => {
                debug!(count = tags.len(), "Tag report");
                for tag in tags {
                    self.forward(DeviceEvent::TagRead(tag)).await;
                }
            }
            MessageBody::ReaderEventNotification(event) => {
                let event = match event {
                    ReaderEvent::ConnectionAttempt { status } => {
                        if status != 0 {
                            warn!(status, "Reader refused connection attempt");
                        }
                        DeviceEvent::ConnectionAttempt {
                            accepted: status == 0,
                        }
                    }
                    ReaderEvent::Gpi { port, high } => DeviceEvent::Gpi { port, high },
                    ReaderEvent::Antenna { antenna, connected } => DeviceEvent::Antenna {
                        antenna: AntennaId::new(antenna),
                        connected,
                    },
                };
                self.forward(event).await;
            }
            MessageBody::Keepalive => {
                let ack = Message::new(message.id, MessageBody::KeepaliveAck);
                if let Err(e) = self.writer.lock().await.send(ack).await {
                    warn!("Failed to answer keepalive: {}", e);
                }
            }
            MessageBody::Unknown { message_type, .. } => {
                debug!(message_type, "Ignoring unknown message");
            }
            MessageBody::Malformed {
                message_type,
                reason,
                payload,
            } => {
                warn!(
                    id = message.id,
                    message_type,
                    len = payload.len(),
                    %reason,
                    "Skipping malformed frame"
                );
                // A waiting command fails fast instead of timing out.
                if MessageType::try_from(message_type).is_ok_and(MessageType::is_response) {
                    let body = MessageBody::Malformed {
                        message_type,
                        reason,
                        payload,
                    };
                    self.route_response(Message::new(message.id, body));
                }
            }
            body => self.route_response(Message::new(message.id, body)),
        }
    }

    fn route_response(&self, message: Message) {
        let waiter = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&message.id),
            Err(_) => None,
        };

        match waiter {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => warn!(
                id = message.id,
                message_type = message.body.type_code(),
                "Response with no waiting command"
            ),
        }
    }

    async fn forward(&self, event: DeviceEvent) {
        if self.events_tx.send(event).await.is_err() {
            trace!("Event subscriber gone, discarding event");
        }
    }
}
