//! Producer-side boundary between sensor packets and session state
//!
//! Link tasks hand every decoded packet to the ingestor. Raw samples go into
//! the bounded transfer queue; the slow-moving readings (device BPM,
//! temperature, finger flag) publish over a watch channel with last-value
//! wins semantics. The producer never touches session state directly.

use std::sync::Arc;

use log::warn;
use tokio::sync::watch;

use crate::protocol::SensorPacket;
use crate::transfer::TransferQueue;

/// Slow-moving readings carried alongside the waveform
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScalarReadings {
    /// BPM estimate reported by the device
    pub heartbeat: Option<f32>,
    /// Skin temperature, cleared by an explicit null in the packet
    pub temperature: Option<f32>,
    /// Finger-on-sensor flag
    pub finger: bool,
}

pub struct SampleIngestor {
    queue: Arc<TransferQueue>,
    readings: watch::Sender<ScalarReadings>,
}

impl SampleIngestor {
    pub fn new(queue: Arc<TransferQueue>) -> (Self, watch::Receiver<ScalarReadings>) {
        let (readings, rx) = watch::channel(ScalarReadings::default());
        (Self { queue, readings }, rx)
    }

    /// Apply one decoded packet: queue its samples, publish its readings.
    ///
    /// Fields the packet does not carry keep their previous value;
    /// an explicit `temperature: null` clears the reading.
    pub fn ingest(&self, packet: &SensorPacket) {
        if packet.has_readings() {
            self.readings.send_modify(|current| {
                if let Some(heartbeat) = packet.heartbeat {
                    current.heartbeat = Some(heartbeat);
                }
                if let Some(temperature) = packet.temperature {
                    current.temperature = temperature;
                }
                if let Some(finger) = packet.finger {
                    current.finger = finger;
                }
            });
        }

        if !packet.raw.is_empty() {
            self.queue.extend(&packet.raw);
        }
    }

    /// Decode and apply one NDJSON line.
    ///
    /// Blank lines are skipped; an unparseable line is dropped whole with a
    /// warning and reports `false`.
    pub fn ingest_line(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return true;
        }
        match serde_json::from_str::<SensorPacket>(line) {
            Ok(packet) => {
                self.ingest(&packet);
                true
            }
            Err(e) => {
                warn!("discarding malformed sensor packet: {}", e);
                false
            }
        }
    }

    /// Return the published readings to their defaults (used by teardown)
    pub fn clear(&self) {
        self.readings.send_replace(ScalarReadings::default());
    }
}
