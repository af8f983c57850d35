//! Event pump: moves device events into the session.
//!
//! One task per connection. It drains the link's event channel in order,
//! records tag reads while the session takes them, republishes reader
//! notifications on the live feed, and turns link loss into a disconnect.
//! A flush request is answered only after every event queued before it
//! has been handled.

use std::sync::Arc;

use readerd_link::DeviceEvent;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{ErrorKind, LastError};
use crate::events::LiveEvent;
use crate::shared::Shared;

#[derive(Debug)]
enum PumpControl {
    Flush(oneshot::Sender<()>),
}

/// Handle to a running pump. Dropping it stops the pump.
#[derive(Debug)]
pub(crate) struct Pump {
    control: mpsc::Sender<PumpControl>,
    task: JoinHandle<()>,
}

impl Pump {
    pub(crate) fn spawn(shared: Arc<Shared>, events: mpsc::Receiver<DeviceEvent>) -> Self {
        let (control, control_rx) = mpsc::channel(4);
        let task = tokio::spawn(run(shared, events, control_rx));
        Self { control, task }
    }

    /// Wait until every event received so far has been handled.
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.control.send(PumpControl::Flush(done_tx)).await.is_err() {
            // Pump already finished; nothing left to drain.
            return;
        }
        let _ = done_rx.await;
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    shared: Arc<Shared>,
    mut events: mpsc::Receiver<DeviceEvent>,
    mut control: mpsc::Receiver<PumpControl>,
) {
    debug!("Event pump started");
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => handle_event(&shared, event),
                None => break,
            },
            Some(PumpControl::Flush(done)) = control.recv() => {
                while let Ok(event) = events.try_recv() {
                    handle_event(&shared, event);
                }
                let _ = done.send(());
            }
        }
    }
    debug!("Event pump finished");
}

fn handle_event(shared: &Shared, event: DeviceEvent) {
    match event {
        DeviceEvent::TagRead(tag) => match shared.accept_tag(&tag) {
            Ok(()) => {
                trace!(tag = %tag.tag_id(), antenna = %tag.antenna(), "Tag read recorded");
                shared.publish(LiveEvent::TagRead(tag));
            }
            Err(state) => {
                warn!(tag = %tag.tag_id(), %state, "Dropping tag read outside inventory");
            }
        },
        DeviceEvent::Gpi { port, high } => {
            info!(port, high, "GPI event");
            shared.publish(LiveEvent::Gpi { port, high });
        }
        DeviceEvent::Antenna { antenna, connected } => {
            info!(%antenna, connected, "Antenna event");
            shared.publish(LiveEvent::Antenna { antenna, connected });
        }
        DeviceEvent::ConnectionAttempt { accepted } => {
            if accepted {
                debug!("Reader accepted connection");
            } else {
                warn!("Reader reported a refused connection attempt");
            }
        }
        DeviceEvent::ConnectionLost { reason } => {
            error!(%reason, "Reader connection lost");
            shared.force_disconnected(Some(LastError::new(
                ErrorKind::Connection,
                format!("Connection lost: {reason}"),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionState;
    use chrono::Utc;
    use readerd_core::{AntennaId, Endpoint, TagEvent, TagId};
    use readerd_link::Liveness;

    fn read(id: u8) -> DeviceEvent {
        DeviceEvent::TagRead(TagEvent::new(
            TagId::new(vec![id]).unwrap(),
            AntennaId::new(1),
            Utc::now(),
        ))
    }

    fn scanning() -> Arc<Shared> {
        let shared = Arc::new(Shared::new(Endpoint::default()));
        shared.transition(SessionState::Connecting).unwrap();
        shared.attach(Liveness::alive()).unwrap();
        shared.transition(SessionState::Scanning).unwrap();
        shared
    }

    #[tokio::test]
    async fn test_flush_handles_queued_events() {
        let shared = scanning();
        let (tx, rx) = mpsc::channel(16);
        let pump = Pump::spawn(Arc::clone(&shared), rx);

        for id in 0..10 {
            tx.send(read(id)).await.unwrap();
        }
        pump.flush().await;

        assert_eq!(shared.buffer().len(), 10);
    }

    #[tokio::test]
    async fn test_reads_outside_inventory_are_counted() {
        let shared = Arc::new(Shared::new(Endpoint::default()));
        let (tx, rx) = mpsc::channel(16);
        let pump = Pump::spawn(Arc::clone(&shared), rx);

        tx.send(read(1)).await.unwrap();
        pump.flush().await;

        assert!(shared.buffer().is_empty());
        assert_eq!(shared.session().dropped_events(), 1);
    }

    #[tokio::test]
    async fn test_connection_lost_disconnects() {
        let shared = scanning();
        let (tx, rx) = mpsc::channel(16);
        let pump = Pump::spawn(Arc::clone(&shared), rx);

        tx.send(DeviceEvent::ConnectionLost {
            reason: "eof".into(),
        })
        .await
        .unwrap();
        pump.flush().await;

        let session = shared.session();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.last_error().unwrap().kind, ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_flush_after_link_closed_returns() {
        let shared = scanning();
        let (tx, rx) = mpsc::channel(16);
        let pump = Pump::spawn(Arc::clone(&shared), rx);

        tx.send(read(1)).await.unwrap();
        drop(tx);
        pump.flush().await;

        assert_eq!(shared.buffer().len(), 1);
    }

    #[tokio::test]
    async fn test_gpi_published() {
        let shared = scanning();
        let mut feed = shared.subscribe();
        let (tx, rx) = mpsc::channel(16);
        let pump = Pump::spawn(Arc::clone(&shared), rx);

        tx.send(DeviceEvent::Gpi { port: 1, high: false }).await.unwrap();
        pump.flush().await;

        assert_eq!(
            feed.recv().await.unwrap(),
            LiveEvent::Gpi {
                port: 1,
                high: false
            }
        );
    }
}
