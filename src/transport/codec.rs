//! Line-delimited JSON framing for the service socket
//!
//! One message per line in both directions. Encoding appends the newline so
//! writers never splice a frame; decoding tolerates surrounding whitespace.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::transport::SocketError;

/// Encode one message as a JSON line, trailing newline included
pub fn encode<M: Serialize>(message: &M) -> Result<String, SocketError> {
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    Ok(json)
}

/// Decode one JSON line into a message
pub fn decode<M: DeserializeOwned>(line: &str) -> Result<M, SocketError> {
    Ok(serde_json::from_str(line.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientMessage, ServerMessage, ViewMode};
    use uuid::Uuid;

    #[test]
    fn test_encoded_frame_is_one_line() {
        let encoded = encode(&ClientMessage::new_status()).unwrap();
        assert!(encoded.ends_with('\n'));
        assert!(encoded.contains("\"type\":\"status\""));
        assert_eq!(encoded.matches('\n').count(), 1);
    }

    #[test]
    fn test_request_roundtrip() {
        let encoded =
            encode(&ClientMessage::new_waveform(Some(ViewMode::Filtered), 250)).unwrap();
        let decoded: ClientMessage = decode(&encoded).unwrap();
        match decoded {
            ClientMessage::Waveform { mode, count, .. } => {
                assert_eq!(mode, Some(ViewMode::Filtered));
                assert_eq!(count, 250);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_response_roundtrip() {
        let id = Uuid::new_v4();
        let encoded = encode(&ServerMessage::new_spectrum(id, vec![0.0, 0.5])).unwrap();
        let decoded: ServerMessage = decode(&encoded).unwrap();
        match decoded {
            ServerMessage::Spectrum { id: got, bins } => {
                assert_eq!(got, id);
                assert_eq!(bins, vec![0.0, 0.5]);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_garbage_line_is_an_error() {
        assert!(decode::<ClientMessage>("{]").is_err());
    }
}
