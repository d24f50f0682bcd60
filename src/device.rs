//! Device-side links to the sensor
//!
//! Three link flavors feed the same ingestor:
//! - `ws`: live WebSocket stream from the firmware at `ws://<host>/ws`
//! - `status`: best-effort HTTP poll of `http://<host>/status`
//! - `reader`: NDJSON replay from any buffered reader (stdin, captures)
//!
//! Links run as spawned tasks owned by the session; they report lifecycle
//! changes over an event channel tagged with the link generation, so events
//! from a torn-down link are recognizably stale.

mod reader;
mod status;
mod ws;

pub use reader::spawn_reader_link;
pub use status::spawn_status_poller;
pub use ws::spawn_ws_link;

use thiserror::Error;

/// How often the wifi status endpoint is polled
pub const STATUS_POLL_INTERVAL_MS: u64 = 2500;

/// Device link error types
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Lifecycle change reported by a link task
#[derive(Debug, Clone)]
pub struct LinkEvent {
    /// Which connect cycle produced the event
    pub generation: u64,
    pub change: LinkChange,
}

#[derive(Debug, Clone)]
pub enum LinkChange {
    Opened,
    Closed,
    Failed(String),
}

/// Upstream commands forwarded to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Ask the firmware for a new sampling rate in Hz
    SetRate(u32),
}
