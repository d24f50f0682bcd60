//! Wifi status poller
//!
//! Polls the firmware's HTTP status endpoint off the hot path. Failures are
//! logged and skipped; the watch channel keeps the last good reading until
//! the session tears the link down.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{DeviceError, STATUS_POLL_INTERVAL_MS};
use crate::protocol::DeviceStatus;

pub fn spawn_status_poller(
    host: String,
    status: Arc<watch::Sender<Option<DeviceStatus>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Keep each request comfortably inside the poll interval
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                error!("failed to build status client: {}", e);
                return;
            }
        };

        let url = format!("http://{}/status", host);
        let mut tick = tokio::time::interval(Duration::from_millis(STATUS_POLL_INTERVAL_MS));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            match fetch_status(&client, &url).await {
                Ok(reading) => {
                    let _ = status.send(Some(reading));
                }
                Err(e) => {
                    debug!("status poll of {} failed: {}", url, e);
                }
            }
        }
    })
}

async fn fetch_status(client: &reqwest::Client, url: &str) -> Result<DeviceStatus, DeviceError> {
    let reading = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<DeviceStatus>()
        .await?;
    Ok(reading)
}
