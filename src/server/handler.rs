//! Per-connection request handling
//!
//! Each accepted connection runs one of these handlers. Requests are
//! answered in order on the connection; once a client subscribes, broadcast
//! snapshot frames are interleaved between its responses.

use std::sync::Arc;

use log::{debug, warn};
use tokio::net::UnixStream;
use uuid::Uuid;

use crate::protocol::{
    ClientMessage, MAX_SAMPLE_RATE_HZ, MAX_SPECTRUM_SIZE, MIN_SAMPLE_RATE_HZ, MIN_SPECTRUM_SIZE,
    ServerMessage,
};
use crate::session::SessionError;
use crate::transport::{AsyncConnection, SocketError};

use super::{SUBSCRIBER_QUEUE_DEPTH, ServerInner};

type ServerResult<T> = std::result::Result<T, SocketError>;

pub(super) async fn handle_connection(
    stream: UnixStream,
    inner: Arc<ServerInner>,
) -> ServerResult<()> {
    let mut conn = AsyncConnection::from_stream(stream);
    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);

    // Set once this connection subscribes, cleared again on exit
    let mut subscriber_id: Option<String> = None;

    loop {
        tokio::select! {
            request = conn.read_client_message() => {
                match request {
                    Ok(Some(ClientMessage::Subscribe { id })) => {
                        debug!("subscriber {} registered", id);
                        subscriber_id = Some(id.to_string());
                        inner.add_subscriber(id.to_string(), event_tx.clone());
                        conn.write_server_message(&ServerMessage::new_subscribed(id)).await?;
                    }
                    Ok(Some(request)) => {
                        debug!("received request: {:?}", request);
                        let response = process_message(request, &inner).await;
                        conn.write_server_message(&response).await?;
                    }
                    // EOF, the client hung up
                    Ok(None) => break,
                    Err(e) => {
                        warn!("dropping client: {}", e);
                        break;
                    }
                }
            }
            Some(frame) = event_rx.recv() => {
                conn.write_raw(&frame).await?;
            }
        }
    }

    if let Some(id) = subscriber_id {
        inner.remove_subscriber(&id);
    }

    Ok(())
}

async fn process_message(request: ClientMessage, inner: &Arc<ServerInner>) -> ServerMessage {
    let session = &inner.session;

    match request {
        ClientMessage::Subscribe { id } => {
            // Intercepted in handle_connection before dispatch
            ServerMessage::new_error(id, "subscribe is handled at the connection level")
        }

        ClientMessage::Waveform { id, mode, count } => {
            match session.waveform(mode, count).await {
                Ok((mode, points)) => ServerMessage::new_waveform(id, mode, points),
                Err(e) => ServerMessage::new_error(id, e.to_string()),
            }
        }

        ClientMessage::Spectrum { id, size } => {
            if !(MIN_SPECTRUM_SIZE..=MAX_SPECTRUM_SIZE).contains(&size) || !size.is_power_of_two()
            {
                return ServerMessage::new_error(
                    id,
                    format!(
                        "spectrum size must be a power of two between {} and {}",
                        MIN_SPECTRUM_SIZE, MAX_SPECTRUM_SIZE
                    ),
                );
            }
            match session.spectrum(size).await {
                Ok(bins) => ServerMessage::new_spectrum(id, bins),
                Err(e) => ServerMessage::new_error(id, e.to_string()),
            }
        }

        ClientMessage::Hrv { id } => match session.hrv().await {
            Ok(series) => ServerMessage::new_hrv(id, series.ibi_ms, series.bpm),
            Err(e) => ServerMessage::new_error(id, e.to_string()),
        },

        ClientMessage::Status { id } => match session.status().await {
            Ok(status) => ServerMessage::Status {
                id,
                link: status.link,
                host: status.host,
                device: status.device,
                mode: status.mode,
                uptime_seconds: status.uptime_seconds,
                samples_seen: status.samples_seen,
                samples_dropped: status.samples_dropped,
                beats: status.beats,
            },
            Err(e) => ServerMessage::new_error(id, e.to_string()),
        },

        ClientMessage::SetMode { id, mode } => ack(id, session.set_mode(mode).await),

        ClientMessage::SetRate { id, hz } => {
            if !(MIN_SAMPLE_RATE_HZ..=MAX_SAMPLE_RATE_HZ).contains(&hz) {
                return ServerMessage::new_error(
                    id,
                    format!(
                        "sampling rate must be between {} and {} Hz",
                        MIN_SAMPLE_RATE_HZ, MAX_SAMPLE_RATE_HZ
                    ),
                );
            }
            ack(id, session.set_rate(hz).await)
        }

        ClientMessage::Reset { id } => ack(id, session.reset().await),

        ClientMessage::Connect { id, host } => {
            if host.trim().is_empty() {
                return ServerMessage::new_error(id, "host must not be empty");
            }
            ack(id, session.connect(host).await)
        }

        ClientMessage::Disconnect { id } => ack(id, session.disconnect().await),
    }
}

fn ack(id: Uuid, result: Result<(), SessionError>) -> ServerMessage {
    match result {
        Ok(()) => ServerMessage::new_ok(id),
        Err(e) => ServerMessage::new_error(id, e.to_string()),
    }
}
