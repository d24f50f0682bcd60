use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dsp::ADC_MAX;

/// Lowest sampling rate the firmware accepts, in Hz
pub const MIN_SAMPLE_RATE_HZ: u32 = 1;
/// Highest sampling rate the firmware accepts, in Hz
pub const MAX_SAMPLE_RATE_HZ: u32 = 1000;
/// Smallest spectrum size clients may request
pub const MIN_SPECTRUM_SIZE: usize = 16;
/// Largest spectrum size clients may request
pub const MAX_SPECTRUM_SIZE: usize = 4096;

/// One NDJSON packet from the sensor firmware.
///
/// Every field is optional and decoded leniently: a field that is absent or
/// carries the wrong JSON type is treated as absent instead of failing the
/// whole packet. Only unparseable JSON rejects the line.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SensorPacket {
    /// Device-side BPM estimate
    #[serde(
        default,
        deserialize_with = "lenient_f32",
        skip_serializing_if = "Option::is_none"
    )]
    pub heartbeat: Option<f32>,
    /// Skin temperature; an explicit `null` clears the reading
    #[serde(
        default,
        deserialize_with = "lenient_nullable_f32",
        skip_serializing_if = "Option::is_none"
    )]
    pub temperature: Option<Option<f32>>,
    /// Finger-on-sensor flag
    #[serde(
        default,
        deserialize_with = "lenient_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub finger: Option<bool>,
    /// Raw ADC samples, clamped to the 10-bit range
    #[serde(
        default,
        deserialize_with = "lenient_samples",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub raw: Vec<u16>,
}

impl SensorPacket {
    /// Whether the packet carries any of the slow-moving readings
    pub fn has_readings(&self) -> bool {
        self.heartbeat.is_some() || self.temperature.is_some() || self.finger.is_some()
    }
}

fn lenient_f32<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_f64().map(|v| v as f32).filter(|v| v.is_finite()))
}

fn lenient_nullable_f32<'de, D>(deserializer: D) -> Result<Option<Option<f32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(Some(None)),
        other => Ok(other
            .as_f64()
            .map(|v| v as f32)
            .filter(|v| v.is_finite())
            .map(Some)),
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_bool())
}

fn lenient_samples<'de, D>(deserializer: D) -> Result<Vec<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .iter()
        .filter_map(|item| item.as_f64())
        .filter(|v| v.is_finite())
        .map(|v| v.round().clamp(0.0, ADC_MAX as f64) as u16)
        .collect())
}

/// Wifi status reported by the firmware's HTTP endpoint
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DeviceStatus {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub rssi: i32,
}

/// State of the device link
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    #[default]
    Closed,
    Open,
    Error,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Closed => "disconnected",
            LinkState::Open => "connected",
            LinkState::Error => "error",
        }
    }
}

/// Which waveform trace reads and broadcasts refer to
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Raw,
    Filtered,
}

/// Messages sent from clients to the monitor service
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Subscribe to periodic snapshot events
    Subscribe { id: Uuid },
    /// Request the most recent waveform points
    Waveform {
        id: Uuid,
        /// Trace to read; defaults to the active view mode
        #[serde(default)]
        mode: Option<ViewMode>,
        #[serde(default = "default_waveform_count")]
        count: usize,
    },
    /// Request spectrum magnitudes over the raw trace
    Spectrum {
        id: Uuid,
        #[serde(default = "default_spectrum_size")]
        size: usize,
    },
    /// Request the inter-beat interval history
    Hrv { id: Uuid },
    /// Request service and device status
    Status { id: Uuid },
    /// Switch the active view mode
    #[serde(rename = "set_mode")]
    SetMode { id: Uuid, mode: ViewMode },
    /// Change the device sampling rate
    #[serde(rename = "set_rate")]
    SetRate { id: Uuid, hz: u32 },
    /// Clear the waveform history and detector state
    Reset { id: Uuid },
    /// Open a link to a sensor at the given host
    Connect { id: Uuid, host: String },
    /// Tear down the active device link
    Disconnect { id: Uuid },
}

fn default_waveform_count() -> usize {
    crate::dsp::DEFAULT_MAX_POINTS
}
fn default_spectrum_size() -> usize {
    crate::dsp::DEFAULT_SPECTRUM_SIZE
}

impl ClientMessage {
    /// Create a new Subscribe request
    pub fn new_subscribe() -> Self {
        ClientMessage::Subscribe { id: Uuid::new_v4() }
    }

    /// Create a new Waveform request
    pub fn new_waveform(mode: Option<ViewMode>, count: usize) -> Self {
        ClientMessage::Waveform {
            id: Uuid::new_v4(),
            mode,
            count,
        }
    }

    /// Create a new Spectrum request
    pub fn new_spectrum(size: usize) -> Self {
        ClientMessage::Spectrum {
            id: Uuid::new_v4(),
            size,
        }
    }

    /// Create a new Hrv request
    pub fn new_hrv() -> Self {
        ClientMessage::Hrv { id: Uuid::new_v4() }
    }

    /// Create a new Status request
    pub fn new_status() -> Self {
        ClientMessage::Status { id: Uuid::new_v4() }
    }

    /// Create a new SetMode request
    pub fn new_set_mode(mode: ViewMode) -> Self {
        ClientMessage::SetMode {
            id: Uuid::new_v4(),
            mode,
        }
    }

    /// Create a new SetRate request
    pub fn new_set_rate(hz: u32) -> Self {
        ClientMessage::SetRate {
            id: Uuid::new_v4(),
            hz,
        }
    }

    /// Create a new Reset request
    pub fn new_reset() -> Self {
        ClientMessage::Reset { id: Uuid::new_v4() }
    }

    /// Create a new Connect request
    pub fn new_connect(host: String) -> Self {
        ClientMessage::Connect {
            id: Uuid::new_v4(),
            host,
        }
    }

    /// Create a new Disconnect request
    pub fn new_disconnect() -> Self {
        ClientMessage::Disconnect { id: Uuid::new_v4() }
    }
}

/// Periodic state summary broadcast to subscribers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub link: LinkState,
    pub mode: ViewMode,
    /// BPM estimate reported by the device
    pub heartbeat: Option<f32>,
    /// BPM derived from the most recent detected inter-beat interval
    pub bpm: Option<f32>,
    pub temperature: Option<f32>,
    pub finger: bool,
    /// Beats detected since the last reset
    pub beats: u64,
    /// Most recent inter-beat interval in milliseconds
    pub ibi_ms: Option<u32>,
    pub device: Option<DeviceStatus>,
    /// Monotonic timestamp in milliseconds since session start
    pub ts: u64,
}

/// Messages sent from the monitor service to clients
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Confirms a subscription; snapshot events follow on this connection
    Subscribed { id: Uuid },
    /// Waveform points, oldest first
    Waveform {
        id: Uuid,
        mode: ViewMode,
        points: Vec<f32>,
    },
    /// Spectrum magnitudes for bins 0..size/2
    Spectrum { id: Uuid, bins: Vec<f32> },
    /// Inter-beat interval history, oldest first
    Hrv {
        id: Uuid,
        ibi_ms: Vec<u32>,
        bpm: Vec<f32>,
    },
    /// Status information (in response to a status request)
    Status {
        id: Uuid,
        link: LinkState,
        host: Option<String>,
        device: Option<DeviceStatus>,
        mode: ViewMode,
        uptime_seconds: u64,
        samples_seen: u64,
        samples_dropped: u64,
        beats: u64,
    },
    /// Acknowledgment for commands without a payload
    Ok { id: Uuid },
    /// Error response
    Error { id: Uuid, error: String },
    /// Snapshot event broadcast (sent periodically to subscribers)
    Snapshot(Snapshot),
}

impl ServerMessage {
    /// Create a Subscribed response
    pub fn new_subscribed(id: Uuid) -> Self {
        ServerMessage::Subscribed { id }
    }

    /// Create a Waveform response
    pub fn new_waveform(id: Uuid, mode: ViewMode, points: Vec<f32>) -> Self {
        ServerMessage::Waveform { id, mode, points }
    }

    /// Create a Spectrum response
    pub fn new_spectrum(id: Uuid, bins: Vec<f32>) -> Self {
        ServerMessage::Spectrum { id, bins }
    }

    /// Create an Hrv response
    pub fn new_hrv(id: Uuid, ibi_ms: Vec<u32>, bpm: Vec<f32>) -> Self {
        ServerMessage::Hrv { id, ibi_ms, bpm }
    }

    /// Create an Ok acknowledgment
    pub fn new_ok(id: Uuid) -> Self {
        ServerMessage::Ok { id }
    }

    /// Create an Error response
    pub fn new_error(id: Uuid, error: impl Into<String>) -> Self {
        ServerMessage::Error {
            id,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_full_decode() {
        let packet: SensorPacket = serde_json::from_str(
            r#"{"heartbeat": 72.5, "temperature": 36.6, "finger": true, "raw": [0, 512, 1023]}"#,
        )
        .unwrap();
        assert_eq!(packet.heartbeat, Some(72.5));
        assert_eq!(packet.temperature, Some(Some(36.6)));
        assert_eq!(packet.finger, Some(true));
        assert_eq!(packet.raw, vec![0, 512, 1023]);
    }

    #[test]
    fn test_packet_wrong_types_are_ignored() {
        let packet: SensorPacket = serde_json::from_str(
            r#"{"heartbeat": "fast", "temperature": [], "finger": 1, "raw": "not-an-array"}"#,
        )
        .unwrap();
        assert_eq!(packet.heartbeat, None);
        assert_eq!(packet.temperature, None);
        assert_eq!(packet.finger, None);
        assert!(packet.raw.is_empty());
        assert!(!packet.has_readings());
    }

    #[test]
    fn test_packet_temperature_null_vs_absent() {
        let cleared: SensorPacket = serde_json::from_str(r#"{"temperature": null}"#).unwrap();
        assert_eq!(cleared.temperature, Some(None));

        let absent: SensorPacket = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(absent.temperature, None);
    }

    #[test]
    fn test_packet_raw_clamps_and_skips() {
        let packet: SensorPacket =
            serde_json::from_str(r#"{"raw": [-5, 0.4, 2000, "x", null, 700]}"#).unwrap();
        assert_eq!(packet.raw, vec![0, 0, 1023, 700]);
    }

    #[test]
    fn test_packet_garbage_line_is_an_error() {
        assert!(serde_json::from_str::<SensorPacket>("not json").is_err());
    }

    #[test]
    fn test_client_message_tags() {
        let encoded = serde_json::to_string(&ClientMessage::new_set_rate(200)).unwrap();
        assert!(encoded.contains("\"type\":\"set_rate\""));
        assert!(encoded.contains("\"hz\":200"));

        let encoded =
            serde_json::to_string(&ClientMessage::new_set_mode(ViewMode::Filtered)).unwrap();
        assert!(encoded.contains("\"type\":\"set_mode\""));
        assert!(encoded.contains("\"mode\":\"filtered\""));
    }

    #[test]
    fn test_client_message_defaults() {
        let decoded: ClientMessage = serde_json::from_str(&format!(
            r#"{{"type":"waveform","id":"{}"}}"#,
            Uuid::new_v4()
        ))
        .unwrap();
        match decoded {
            ClientMessage::Waveform { mode, count, .. } => {
                assert_eq!(mode, None);
                assert_eq!(count, 1000);
            }
            _ => panic!("Wrong message type"),
        }

        let decoded: ClientMessage = serde_json::from_str(&format!(
            r#"{{"type":"spectrum","id":"{}"}}"#,
            Uuid::new_v4()
        ))
        .unwrap();
        match decoded {
            ClientMessage::Spectrum { size, .. } => assert_eq!(size, 256),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_snapshot_event_roundtrip() {
        let snapshot = Snapshot {
            link: LinkState::Open,
            mode: ViewMode::Raw,
            heartbeat: Some(71.0),
            bpm: Some(68.9),
            temperature: None,
            finger: true,
            beats: 12,
            ibi_ms: Some(871),
            device: Some(DeviceStatus {
                ssid: "lab".to_string(),
                ip: "192.168.4.1".to_string(),
                rssi: -61,
            }),
            ts: 4200,
        };
        let encoded = serde_json::to_string(&ServerMessage::Snapshot(snapshot.clone())).unwrap();
        assert!(encoded.contains("\"type\":\"snapshot\""));

        let decoded: ServerMessage = serde_json::from_str(&encoded).unwrap();
        match decoded {
            ServerMessage::Snapshot(s) => assert_eq!(s, snapshot),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_link_state_names() {
        assert_eq!(LinkState::Open.as_str(), "connected");
        assert_eq!(serde_json::to_string(&LinkState::Error).unwrap(), "\"error\"");
    }
}
