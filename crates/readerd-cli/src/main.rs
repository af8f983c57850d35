//! readerd - RFID reader control
//!
//! # Usage
//!
//! ```bash
//! # Run inventory for two seconds and print the tags
//! readerd --endpoint 192.168.1.50 inventory --duration 2000
//!
//! # Stream reads from a simulated reader
//! readerd --simulate watch
//!
//! # Use a config file
//! readerd --config configs/readerd.toml watch
//! ```

mod cmd;
mod config;
mod logging;
mod simulate;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use readerd_core::Endpoint;
use readerd_link::{AnyDeviceLink, TcpLink};
use readerd_session::SessionConfig;
use tracing::debug;

use crate::config::Config;
use crate::simulate::Simulator;

/// readerd - RFID reader control
#[derive(Parser, Debug)]
#[command(name = "readerd")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file
    #[arg(short, long, env = "READERD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Reader address, host[:port]
    #[arg(short, long, global = true)]
    endpoint: Option<Endpoint>,

    /// GPI port that starts and stops inventory
    #[arg(long, global = true)]
    gpi_port: Option<u16>,

    /// Use a simulated reader with synthetic tags
    #[arg(long, global = true)]
    simulate: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run inventory for a fixed window and print the tags as JSON
    Inventory(cmd::inventory::InventoryArgs),

    /// Stream live events as JSON lines until Ctrl-C
    Watch(cmd::watch::WatchArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(endpoint) = cli.endpoint {
        config.reader.endpoint = endpoint;
    }
    if cli.gpi_port.is_some() {
        config.reader.gpi_trigger_port = cli.gpi_port;
    }

    logging::init_logging(cli.log_level.as_deref(), &config.log)?;
    debug!(?config, "Configuration loaded");

    let reader = config.reader;
    let (link, _simulator) = build_link(&reader, cli.simulate);

    match cli.command {
        Command::Inventory(args) => cmd::inventory::run(link, reader, args).await,
        Command::Watch(args) => cmd::watch::run(link, reader, args).await,
    }
}

/// Construct the device link, sized by `reader.event_capacity`.
fn build_link(reader: &SessionConfig, simulate: bool) -> (AnyDeviceLink, Option<Simulator>) {
    if simulate {
        let (link, simulator) = Simulator::start(reader.event_capacity, reader.gpi_trigger_port);
        (AnyDeviceLink::Mock(link), Some(simulator))
    } else {
        (
            AnyDeviceLink::Tcp(TcpLink::with_event_capacity(reader.event_capacity)),
            None,
        )
    }
}
