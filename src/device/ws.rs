//! WebSocket link to the sensor firmware

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{DeviceCommand, DeviceError, LinkChange, LinkEvent};
use crate::ingest::SampleIngestor;

/// Open `ws://<host>/ws` and pump sensor packets into the ingestor.
///
/// The task ends when the server closes, an error occurs, or the session
/// drops the command channel. There is no automatic reconnect; the session
/// decides when to dial again.
pub fn spawn_ws_link(
    host: String,
    generation: u64,
    ingestor: Arc<SampleIngestor>,
    events: mpsc::Sender<LinkEvent>,
    commands: mpsc::Receiver<DeviceCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = run_link(&host, generation, ingestor, &events, commands).await {
            warn!("device link to {} failed: {}", host, e);
            let _ = events
                .send(LinkEvent {
                    generation,
                    change: LinkChange::Failed(e.to_string()),
                })
                .await;
        }
    })
}

async fn run_link(
    host: &str,
    generation: u64,
    ingestor: Arc<SampleIngestor>,
    events: &mpsc::Sender<LinkEvent>,
    mut commands: mpsc::Receiver<DeviceCommand>,
) -> Result<(), DeviceError> {
    let url = format!("ws://{}/ws", host);
    info!("connecting to sensor at {}", url);

    let (stream, _) = connect_async(&url).await?;
    let (mut sink, mut source) = stream.split();

    let _ = events
        .send(LinkEvent {
            generation,
            change: LinkChange::Opened,
        })
        .await;

    loop {
        tokio::select! {
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    for line in text.lines() {
                        ingestor.ingest_line(line);
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!("ignoring binary frame from {}", host);
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("sensor at {} closed the stream", host);
                    let _ = events
                        .send(LinkEvent {
                            generation,
                            change: LinkChange::Closed,
                        })
                        .await;
                    break;
                }
                // Pings and pongs are answered by the stream itself
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            command = commands.recv() => match command {
                Some(DeviceCommand::SetRate(hz)) => {
                    let payload = serde_json::json!({ "hz": hz }).to_string();
                    debug!("setting sampling rate to {} Hz", hz);
                    sink.send(Message::Text(payload.into())).await?;
                }
                // Session dropped its handle: the link is being torn down
                None => break,
            },
        }
    }

    Ok(())
}
