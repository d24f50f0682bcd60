//! Socket plumbing shared by the server and the CLI client commands
//!
//! Everything on the service socket is line-delimited JSON, one message per
//! line: `codec` frames the protocol messages, `async_transport` dials the
//! socket and speaks the framing over tokio Unix streams.

use std::time::Duration;

use thiserror::Error;

mod async_transport;
pub mod codec;

pub use async_transport::{AsyncConnection, AsyncTransport};

/// Default Unix socket path for the pulsemon service
pub const DEFAULT_SOCKET_PATH: &str = "/run/user/$UID/pulsemon/pulsemon.sock";

/// Socket error types
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("socket connection error: {0}")]
    Connection(String),
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad message framing: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("no reply from the service within {0:?}")]
    Timeout(Duration),
}
