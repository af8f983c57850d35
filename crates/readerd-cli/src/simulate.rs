//! Synthetic reader for `--simulate`.
//!
//! Drives a [`MockLink`] with a fixed tag population read round-robin
//! across four antennas. With a GPI port set, the port is toggled so the
//! GPI trigger has something to react to.

use std::time::Duration;

use chrono::Utc;
use readerd_core::{AntennaId, TagEvent, TagId};
use readerd_link::DeviceEvent;
use readerd_link::mock::{MockLink, MockLinkHandle};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const TAG_COUNT: u8 = 12;
const ANTENNAS: u16 = 4;
const READ_INTERVAL: Duration = Duration::from_millis(40);
/// Reads between GPI level changes.
const GPI_PERIOD: u64 = 100;

/// Background tag generator. Stops when dropped.
pub struct Simulator {
    task: JoinHandle<()>,
}

impl Simulator {
    /// Build a mock link and start feeding it.
    pub fn start(event_capacity: usize, gpi_port: Option<u16>) -> (MockLink, Self) {
        let (link, mock) = MockLink::with_event_capacity(event_capacity);
        info!(tags = TAG_COUNT, "Simulating reader");
        let task = tokio::spawn(generate(mock, gpi_port));
        (link, Self { task })
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn synthetic_tag(n: u64) -> Option<TagEvent> {
    let index = (n % u64::from(TAG_COUNT)) as u8;
    let antenna = (n % u64::from(ANTENNAS)) as u16 + 1;
    let epc = [0xE2, 0x80, 0x11, 0x60, 0x60, 0x00, 0x02, index];
    let tag = TagId::new(epc.to_vec()).ok()?;
    let rssi = -40 - i16::from(index) * 2;
    Some(TagEvent::new(tag, AntennaId::new(antenna), Utc::now()).with_rssi(rssi))
}

async fn generate(mock: MockLinkHandle, gpi_port: Option<u16>) {
    let mut ticker = tokio::time::interval(READ_INTERVAL);
    let mut n: u64 = 0;
    let mut gpi_high = false;

    loop {
        ticker.tick().await;
        if !mock.is_connected() {
            continue;
        }

        if let Some(port) = gpi_port
            && n % GPI_PERIOD == 0
        {
            gpi_high = !gpi_high;
            debug!(port, high = gpi_high, "Simulated GPI change");
            mock.emit(DeviceEvent::Gpi {
                port,
                high: gpi_high,
            })
            .await;
        }

        if mock.is_scanning()
            && let Some(event) = synthetic_tag(n)
        {
            mock.emit(DeviceEvent::TagRead(event)).await;
        }
        n = n.wrapping_add(1);
    }
}
