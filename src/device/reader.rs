//! NDJSON replay link
//!
//! Feeds sensor packets from any buffered reader, one JSON object per line.
//! Used for piping serial captures or standard input into the monitor.

use std::sync::Arc;

use log::info;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{LinkChange, LinkEvent};
use crate::ingest::SampleIngestor;

pub fn spawn_reader_link<R>(
    reader: R,
    generation: u64,
    ingestor: Arc<SampleIngestor>,
    events: mpsc::Sender<LinkEvent>,
) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let _ = events
            .send(LinkEvent {
                generation,
                change: LinkChange::Opened,
            })
            .await;

        let mut lines = reader.lines();
        let change = loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    ingestor.ingest_line(&line);
                }
                Ok(None) => {
                    info!("replay input reached end of stream");
                    break LinkChange::Closed;
                }
                Err(e) => break LinkChange::Failed(e.to_string()),
            }
        };

        let _ = events.send(LinkEvent { generation, change }).await;
    })
}
