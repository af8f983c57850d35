//! `readerd watch`: stream live events until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use readerd_link::AnyDeviceLink;
use readerd_session::{LiveEvent, SessionConfig, SessionController, spawn_gpi_trigger};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Only print tag reads
    #[arg(long)]
    pub tags_only: bool,
}

pub async fn run(link: AnyDeviceLink, config: SessionConfig, args: WatchArgs) -> Result<()> {
    let gpi_port = config.gpi_trigger_port;
    let controller = Arc::new(SessionController::new(link, config));
    let endpoint = controller.config().endpoint.clone();
    let mut feed = controller.subscribe();

    let trigger = match gpi_port {
        Some(port) => {
            controller
                .connect()
                .await
                .with_context(|| format!("Failed to connect to {endpoint}"))?;
            info!(port, "Waiting for GPI trigger");
            Some(spawn_gpi_trigger(Arc::clone(&controller), port))
        }
        None => {
            controller
                .start()
                .await
                .with_context(|| format!("Failed to start inventory on {endpoint}"))?;
            None
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = feed.recv() => match event {
                Ok(event) => print_event(&event, args.tags_only)?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Output lagged, events skipped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    controller.shutdown().await;
    if let Some(trigger) = trigger {
        let _ = trigger.await;
    }
    let session = controller.session();
    info!(
        accepted = session.accepted_events(),
        dropped = session.dropped_events(),
        tags = controller.buffer().len(),
        "Watch finished"
    );
    Ok(())
}

fn print_event(event: &LiveEvent, tags_only: bool) -> Result<()> {
    if tags_only && !matches!(event, LiveEvent::TagRead(_)) {
        return Ok(());
    }
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}
