//! Socket server for the monitor service
//!
//! Owns the Unix listener: every accepted connection gets its own handler
//! task that answers requests against the session, and a broadcast task
//! pushes periodic snapshot events to subscribed connections.

mod handler;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::ServerMessage;
use crate::session::SessionHandle;
use crate::transport::{SocketError, codec};

use handler::handle_connection;

/// Cadence of the snapshot broadcast to subscribers
const SNAPSHOT_INTERVAL_MS: u64 = 100;

/// Frames a subscriber may leave unread before it counts as stalled
const SUBSCRIBER_QUEUE_DEPTH: usize = 64;

type ServerResult<T> = std::result::Result<T, SocketError>;

pub struct SocketServer {
    inner: Arc<ServerInner>,
    listener: UnixListener,
}

impl SocketServer {
    pub fn new<P: AsRef<Path>>(socket_path: P, session: SessionHandle) -> ServerResult<Self> {
        Ok(Self {
            inner: Arc::new(ServerInner::new(session)),
            listener: bind_socket(socket_path.as_ref())?,
        })
    }

    pub async fn run(&mut self) -> ServerResult<()> {
        info!("socket server listening for connections");

        let snapshots = tokio::spawn(Self::snapshot_monitor(Arc::clone(&self.inner)));
        let inner = Arc::clone(&self.inner);

        tokio::select! {
            _ = inner.shutdown.notified() => {
                info!("shutdown signal received, stopping server");
                snapshots.abort();
                self.remove_socket_file();
                Ok(())
            }
            result = self.accept_loop() => {
                snapshots.abort();
                result
            }
        }
    }

    /// Poll the session on a fixed cadence and fan the snapshot out to every
    /// subscriber. A dead session task takes the whole server down.
    async fn snapshot_monitor(inner: Arc<ServerInner>) {
        let mut tick = tokio::time::interval(Duration::from_millis(SNAPSHOT_INTERVAL_MS));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;

            match inner.session.snapshot().await {
                Ok(snapshot) => inner.broadcast_event(ServerMessage::Snapshot(snapshot)),
                Err(_) => {
                    error!("session task is gone, shutting down");
                    inner.shutdown.notify_one();
                    break;
                }
            }
        }
    }

    async fn accept_loop(&mut self) -> ServerResult<()> {
        loop {
            let (stream, _) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("failed to accept connection: {}", e);
                    continue;
                }
            };

            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, inner).await {
                    warn!("connection handler ended with error: {}", e);
                }
            });
        }
    }

    fn remove_socket_file(&self) {
        let Ok(addr) = self.listener.local_addr() else {
            return;
        };
        if let Some(path) = addr.as_pathname().filter(|p| p.exists())
            && let Err(e) = std::fs::remove_file(path)
        {
            warn!("failed to remove socket file: {}", e);
        }
    }
}

/// Prepare and bind the listening socket: parent directory created, any
/// stale socket file removed, permissions restricted to the owner.
fn bind_socket(path: &Path) -> ServerResult<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let listener = UnixListener::bind(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::AddrInUse => SocketError::Connection(format!(
            "a service is already listening on {}; stop it first ('systemctl --user stop pulsemon.service')",
            path.display()
        )),
        _ => SocketError::Connection(format!("failed to bind {}: {}", path.display(), e)),
    })?;

    // Owner-only: the socket accepts control commands
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(listener)
}

struct SubscriberHandle {
    id: String,
    tx: mpsc::Sender<Vec<u8>>,
}

/// State shared between the accept loop, the handlers and the broadcast task
struct ServerInner {
    session: SessionHandle,
    subscribers: Mutex<Vec<SubscriberHandle>>,
    shutdown: Notify,
}

impl ServerInner {
    fn new(session: SessionHandle) -> Self {
        Self {
            session,
            subscribers: Mutex::new(Vec::new()),
            shutdown: Notify::new(),
        }
    }

    fn add_subscriber(&self, id: String, tx: mpsc::Sender<Vec<u8>>) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(SubscriberHandle { id, tx });
        }
    }

    fn remove_subscriber(&self, id: &str) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|sub| sub.id != id);
        }
    }

    /// Encode the event once and hand every live subscriber the same bytes.
    /// Subscribers that hung up or stopped reading are dropped from the list.
    fn broadcast_event(&self, event: ServerMessage) {
        let Ok(frame) = codec::encode(&event) else {
            warn!("failed to encode broadcast event");
            return;
        };
        let frame = frame.into_bytes();

        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|sub| match sub.tx.try_send(frame.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("subscriber {} stopped reading, dropping it", sub.id);
                    false
                }
                // The handler task is gone
                Err(TrySendError::Closed(_)) => false,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientMessage, LinkState, ViewMode};
    use crate::session::{Session, SessionConfig};
    use crate::transport::AsyncTransport;

    async fn start_server(dir: &tempfile::TempDir) -> AsyncTransport {
        let socket_path = dir
            .path()
            .join("pulsemon.sock")
            .to_string_lossy()
            .to_string();
        let session = Session::spawn(SessionConfig::default());
        let mut server = SocketServer::new(&socket_path, session).unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        AsyncTransport::new(socket_path)
    }

    #[tokio::test]
    async fn test_status_request_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let transport = start_server(&dir).await;

        let response = transport
            .send_request(&ClientMessage::new_status())
            .await
            .unwrap();
        match response {
            ServerMessage::Status {
                link,
                host,
                samples_seen,
                ..
            } => {
                assert_eq!(link, LinkState::Closed);
                assert_eq!(host, None);
                assert_eq!(samples_seen, 0);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_waveform_request_is_empty_on_fresh_session() {
        let dir = tempfile::tempdir().unwrap();
        let transport = start_server(&dir).await;

        let response = transport
            .send_request(&ClientMessage::new_waveform(None, 50))
            .await
            .unwrap();
        match response {
            ServerMessage::Waveform { mode, points, .. } => {
                assert_eq!(mode, ViewMode::Raw);
                assert!(points.is_empty());
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hrv_request_is_empty_on_fresh_session() {
        let dir = tempfile::tempdir().unwrap();
        let transport = start_server(&dir).await;

        let response = transport
            .send_request(&ClientMessage::new_hrv())
            .await
            .unwrap();
        match response {
            ServerMessage::Hrv { ibi_ms, bpm, .. } => {
                assert!(ibi_ms.is_empty());
                assert!(bpm.is_empty());
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_out_of_range_rate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transport = start_server(&dir).await;

        let response = transport
            .send_request(&ClientMessage::new_set_rate(5000))
            .await
            .unwrap();
        assert!(matches!(response, ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn test_rate_without_device_link_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transport = start_server(&dir).await;

        let response = transport
            .send_request(&ClientMessage::new_set_rate(100))
            .await
            .unwrap();
        match response {
            ServerMessage::Error { error, .. } => assert!(error.contains("no device link")),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_spectrum_size_keeps_the_connection() {
        let dir = tempfile::tempdir().unwrap();
        let transport = start_server(&dir).await;

        let mut conn = transport.connect().await.unwrap();
        conn.write_message(&ClientMessage::new_spectrum(100))
            .await
            .unwrap();
        let response = conn.read_server_message().await.unwrap().unwrap();
        assert!(matches!(response, ServerMessage::Error { .. }));

        // A valid request on the same connection still succeeds
        conn.write_message(&ClientMessage::new_spectrum(256))
            .await
            .unwrap();
        let response = conn.read_server_message().await.unwrap().unwrap();
        match response {
            ServerMessage::Spectrum { bins, .. } => assert_eq!(bins.len(), 128),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_snapshot_events() {
        let dir = tempfile::tempdir().unwrap();
        let transport = start_server(&dir).await;

        let mut conn = transport.connect().await.unwrap();
        conn.write_message(&ClientMessage::new_subscribe())
            .await
            .unwrap();

        let ack = conn.read_server_message().await.unwrap().unwrap();
        assert!(matches!(ack, ServerMessage::Subscribed { .. }));

        // The broadcast task fires within one snapshot interval
        let event = conn.read_server_message().await.unwrap().unwrap();
        match event {
            ServerMessage::Snapshot(snapshot) => {
                assert_eq!(snapshot.link, LinkState::Closed);
                assert_eq!(snapshot.beats, 0);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // The same connection still answers requests between events
        conn.write_message(&ClientMessage::new_reset())
            .await
            .unwrap();
        loop {
            let message = conn.read_server_message().await.unwrap().unwrap();
            match message {
                ServerMessage::Snapshot(_) => continue,
                ServerMessage::Ok { .. } => break,
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_stalled_subscriber_is_dropped_from_broadcast() {
        let session = Session::spawn(SessionConfig::default());
        let inner = ServerInner::new(session);

        let (tx, _rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        inner.add_subscriber("stalled".to_string(), tx);

        // Never drain _rx: the queue fills, then the next broadcast evicts
        for _ in 0..=SUBSCRIBER_QUEUE_DEPTH {
            inner.broadcast_event(ServerMessage::new_ok(uuid::Uuid::new_v4()));
        }

        assert!(inner.subscribers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_mode_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let transport = start_server(&dir).await;

        let response = transport
            .send_request(&ClientMessage::new_set_mode(ViewMode::Filtered))
            .await
            .unwrap();
        assert!(matches!(response, ServerMessage::Ok { .. }));

        let response = transport
            .send_request(&ClientMessage::new_status())
            .await
            .unwrap();
        match response {
            ServerMessage::Status { mode, .. } => assert_eq!(mode, ViewMode::Filtered),
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
