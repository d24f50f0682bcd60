//! Tokio transport over the service socket

use std::io::ErrorKind;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::{SocketError, codec};

/// Replies normally arrive within one actor turn; anything slower than this
/// means the service is wedged
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stateless dialer for one-shot requests against the service socket
pub struct AsyncTransport {
    socket_path: String,
}

impl AsyncTransport {
    pub fn new(socket_path: String) -> Self {
        Self { socket_path }
    }

    /// Dial the service socket
    pub async fn connect(&self) -> Result<AsyncConnection, SocketError> {
        match UnixStream::connect(&self.socket_path).await {
            Ok(stream) => Ok(AsyncConnection::from_stream(stream)),
            Err(e) => Err(self.connect_error(e)),
        }
    }

    /// Dial, send one request and wait for the matching reply
    pub async fn send_request(
        &self,
        message: &ClientMessage,
    ) -> Result<ServerMessage, SocketError> {
        let mut conn = self.connect().await?;
        conn.write_message(message).await?;

        match tokio::time::timeout(REQUEST_TIMEOUT, conn.read_server_message()).await {
            Ok(reply) => reply?.ok_or_else(|| {
                SocketError::Connection("service closed the connection without a reply".to_string())
            }),
            Err(_) => Err(SocketError::Timeout(REQUEST_TIMEOUT)),
        }
    }

    fn connect_error(&self, e: std::io::Error) -> SocketError {
        match e.kind() {
            ErrorKind::ConnectionRefused | ErrorKind::NotFound => {
                SocketError::Connection(format!(
                    "no service on {} ({}); start one with 'pulsemon serve'",
                    self.socket_path, e
                ))
            }
            _ => SocketError::Connection(format!(
                "failed to connect to {}: {}",
                self.socket_path, e
            )),
        }
    }
}

/// One framed duplex connection. The server holds one per accepted client;
/// the watch command holds one for its subscription.
///
/// Reads go through `Lines::next_line`, which keeps partial progress across
/// polls; the per-connection handler races reads against broadcast sends in
/// a `select!`, so a cancelled read must not lose buffered bytes.
pub struct AsyncConnection {
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl AsyncConnection {
    pub fn from_stream(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half).lines(),
            writer: write_half,
        }
    }

    async fn read_frame<M: DeserializeOwned>(&mut self) -> Result<Option<M>, SocketError> {
        match self.reader.next_line().await? {
            Some(line) => Ok(Some(codec::decode(&line)?)),
            // EOF, the peer hung up
            None => Ok(None),
        }
    }

    async fn write_frame<M: Serialize>(&mut self, message: &M) -> Result<(), SocketError> {
        let encoded = codec::encode(message)?;
        self.write_raw(encoded.as_bytes()).await
    }

    /// Write an already-encoded frame; the broadcast fan-out encodes once
    /// and hands every subscriber the same bytes
    pub async fn write_raw(&mut self, frame: &[u8]) -> Result<(), SocketError> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next request from a client; `None` once the client hangs up
    pub async fn read_client_message(&mut self) -> Result<Option<ClientMessage>, SocketError> {
        self.read_frame().await
    }

    /// Next reply or broadcast event from the service
    pub async fn read_server_message(&mut self) -> Result<Option<ServerMessage>, SocketError> {
        self.read_frame().await
    }

    pub async fn write_message(&mut self, message: &ClientMessage) -> Result<(), SocketError> {
        self.write_frame(message).await
    }

    pub async fn write_server_message(
        &mut self,
        message: &ServerMessage,
    ) -> Result<(), SocketError> {
        self.write_frame(message).await
    }
}
