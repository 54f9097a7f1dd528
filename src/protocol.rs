//! Wire types for the duplex endpoint protocol.
//!
//! Control messages flow as JSON text. Outbound microphone audio flows as
//! binary frames (raw i16le PCM). Inbound synthesized audio arrives
//! base64-encoded inside JSON messages, optionally alongside an
//! `interrupted` flag when the server detects the caller speaking over the
//! synthesized output.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Stream parameters declared to the server in the setup message.
#[derive(Serialize, Debug)]
pub struct AudioParams {
    pub format: &'static str,
    pub channels: u8,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
}

/// First message on the wire; configures the persona and audio streams.
#[derive(Serialize, Debug)]
pub struct SetupMessage {
    #[serde(rename = "type")]
    msg_type: &'static str,
    instruction: String,
    voice: String,
    modality: &'static str,
    audio_params: AudioParams,
}

impl SetupMessage {
    pub fn new(
        instruction: String,
        voice: String,
        input_sample_rate: u32,
        output_sample_rate: u32,
    ) -> Self {
        Self {
            msg_type: "setup",
            instruction,
            voice,
            modality: "audio",
            audio_params: AudioParams {
                format: "pcm16",
                channels: 1,
                input_sample_rate,
                output_sample_rate,
            },
        }
    }
}

/// Raw server message as it appears on the wire.
#[derive(Deserialize, Debug)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    /// Base64-encoded i16le PCM, 24 kHz mono.
    pub audio: Option<String>,
    #[serde(default)]
    pub interrupted: bool,
}

/// A decoded inbound event: zero or one audio payload plus the barge-in flag.
#[derive(Debug, Default)]
pub struct ServerEvent {
    pub audio: Option<Vec<u8>>,
    pub interrupted: bool,
}

impl ServerMessage {
    /// The server's acknowledgement of the setup message; completes the
    /// handshake and opens the session.
    pub fn is_ready(&self) -> bool {
        self.msg_type.as_deref() == Some("ready")
    }

    pub fn into_event(self) -> Result<ServerEvent, SessionError> {
        let audio = match self.audio {
            Some(b64) => Some(BASE64.decode(b64.as_bytes()).map_err(|e| {
                SessionError::Protocol(format!("invalid audio payload encoding: {e}"))
            })?),
            None => None,
        };
        Ok(ServerEvent {
            audio,
            interrupted: self.interrupted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_message_serializes_with_audio_params() {
        let msg = SetupMessage::new("be helpful".to_string(), "Fenrir".to_string(), 16000, 24000);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"setup""#));
        assert!(json.contains(r#""voice":"Fenrir""#));
        assert!(json.contains(r#""input_sample_rate":16000"#));
        assert!(json.contains(r#""output_sample_rate":24000"#));
    }

    #[test]
    fn ready_message_completes_handshake() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert!(msg.is_ready());
    }

    #[test]
    fn audio_payload_round_trips_through_base64() {
        let payload = BASE64.encode([0x01u8, 0x02, 0x03, 0x04]);
        let msg: ServerMessage =
            serde_json::from_str(&format!(r#"{{"type":"audio","audio":"{payload}"}}"#)).unwrap();
        let event = msg.into_event().unwrap();
        assert_eq!(event.audio.as_deref(), Some(&[0x01u8, 0x02, 0x03, 0x04][..]));
        assert!(!event.interrupted);
    }

    #[test]
    fn interrupted_flag_parses_without_audio() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"turn","interrupted":true}"#).unwrap();
        let event = msg.into_event().unwrap();
        assert!(event.audio.is_none());
        assert!(event.interrupted);
    }

    #[test]
    fn malformed_base64_is_a_protocol_error() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"audio":"not base64!!!"}"#).unwrap();
        assert!(matches!(
            msg.into_event(),
            Err(SessionError::Protocol(_))
        ));
    }
}
