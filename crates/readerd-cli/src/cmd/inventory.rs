//! `readerd inventory`: one bounded inventory window.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use readerd_core::{Endpoint, TagEvent};
use readerd_link::AnyDeviceLink;
use readerd_session::{SessionConfig, SessionController};
use serde::Serialize;
use tracing::info;

#[derive(Args, Debug)]
pub struct InventoryArgs {
    /// How long to run inventory, in milliseconds
    #[arg(short, long, default_value_t = 1000)]
    pub duration: u64,

    /// Print per-tag read counts instead of the latest read per tag
    #[arg(long)]
    pub summary: bool,
}

#[derive(Serialize)]
struct Report<'a, T> {
    endpoint: &'a Endpoint,
    duration_ms: u64,
    count: usize,
    tags: Vec<T>,
}

pub async fn run(link: AnyDeviceLink, config: SessionConfig, args: InventoryArgs) -> Result<()> {
    let controller = SessionController::new(link, config);
    let endpoint = controller.config().endpoint.clone();

    controller
        .start()
        .await
        .with_context(|| format!("Failed to start inventory on {endpoint}"))?;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(args.duration)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping inventory"),
    }

    let stopped = controller.stop().await;
    let summary = controller.summary();
    controller.disconnect().await;
    let tags = stopped.with_context(|| format!("Failed to stop inventory on {endpoint}"))?;

    let json = if args.summary {
        render(&endpoint, args.duration, summary)?
    } else {
        render::<TagEvent>(&endpoint, args.duration, tags)?
    };
    println!("{json}");
    Ok(())
}

fn render<T: Serialize>(endpoint: &Endpoint, duration_ms: u64, tags: Vec<T>) -> Result<String> {
    let report = Report {
        endpoint,
        duration_ms,
        count: tags.len(),
        tags,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}
