//! Start and stop inventory from a GPI line.

use std::sync::Arc;

use readerd_link::DeviceLink;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::controller::SessionController;
use crate::error::SessionError;
use crate::events::LiveEvent;

/// Spawn a task that starts inventory when GPI `port` goes high and stops
/// it when the port goes low.
///
/// The task ends when the controller shuts down.
pub fn spawn_gpi_trigger<L>(controller: Arc<SessionController<L>>, port: u16) -> JoinHandle<()>
where
    L: DeviceLink + 'static,
{
    let mut events = controller.subscribe();
    let shutdown = controller.shutdown_token();

    tokio::spawn(async move {
        info!(port, "GPI trigger armed");
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };

            let high = match event {
                Ok(LiveEvent::Gpi { port: p, high }) if p == port => high,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(port, skipped, "GPI trigger lagged behind the live feed");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if high {
                match controller.start().await {
                    Ok(()) => info!(port, "Inventory started by GPI"),
                    Err(SessionError::AlreadyScanning) => {
                        debug!(port, "GPI high, already scanning")
                    }
                    Err(e) => warn!(port, error = %e, "GPI start failed"),
                }
            } else {
                match controller.stop().await {
                    Ok(tags) => info!(port, tags = tags.len(), "Inventory stopped by GPI"),
                    Err(e @ SessionError::NotScanning { .. }) => {
                        debug!(port, error = %e, "GPI low, not scanning")
                    }
                    Err(e) => warn!(port, error = %e, "GPI stop failed"),
                }
            }
        }
        debug!(port, "GPI trigger finished");
    })
}
