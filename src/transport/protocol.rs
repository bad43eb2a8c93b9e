//! JSON messages of the bidirectional live API.
//!
//! Client → server:
//! - `{"setup": {...}}` once, right after connecting
//! - `{"realtimeInput": {"mediaChunks": [{"mimeType", "data"}]}}` per packet
//!
//! Server → client:
//! - `{"setupComplete": {}}` acknowledges the setup
//! - `{"serverContent": {...}}` carries audio parts and turn signals

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::transport::{InboundEvent, WireMessage};
use crate::{AudioFormat, OutboundPacket, VoiceError};

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session setup, the first message on every connection.
    Setup(Setup),
    /// Streaming microphone audio.
    RealtimeInput(RealtimeInput),
}

/// Session setup payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Model or service name.
    pub model: String,
    /// Output configuration.
    pub generation_config: GenerationConfig,
    /// Optional system instruction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

/// Requested response modalities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Always `["AUDIO"]` for voice sessions.
    pub response_modalities: Vec<String>,
}

/// A list of content parts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// The parts, in order.
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One content part: text or inline binary data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline base64 data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64-encoded media with its MIME type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

/// Realtime audio input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    /// Media chunks, sent in order.
    pub media_chunks: Vec<Blob>,
}

/// A message from the server. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// Present on the setup acknowledgement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<serde_json::Value>,
    /// Model output and turn signals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    /// The server is about to disconnect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_away: Option<serde_json::Value>,
}

/// Model output within a [`ServerMessage`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    /// Audio (and possibly text) produced by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,
    /// The user barged in; queued output should stop.
    #[serde(default)]
    pub interrupted: bool,
    /// The model finished its turn.
    #[serde(default)]
    pub turn_complete: bool,
}

/// Serializes the setup message.
///
/// # Errors
///
/// Returns [`VoiceError::Protocol`] if serialization fails.
pub fn setup_message(model: &str, system_instruction: Option<&str>) -> Result<String, VoiceError> {
    let message = ClientMessage::Setup(Setup {
        model: model.to_string(),
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
        },
        system_instruction: system_instruction.map(|text| Content {
            parts: vec![Part {
                text: Some(text.to_string()),
                inline_data: None,
            }],
        }),
    });
    to_json(&message)
}

/// Serializes one outbound packet as a `realtimeInput` message.
///
/// # Errors
///
/// Returns [`VoiceError::Protocol`] if serialization fails.
pub fn realtime_input_message(packet: &OutboundPacket) -> Result<String, VoiceError> {
    let message = ClientMessage::RealtimeInput(RealtimeInput {
        media_chunks: vec![Blob {
            mime_type: packet.format().pcm_mime_type(),
            data: BASE64.encode(packet.data()),
        }],
    });
    to_json(&message)
}

fn to_json(message: &ClientMessage) -> Result<String, VoiceError> {
    serde_json::to_string(message).map_err(|e| VoiceError::Protocol(e.to_string()))
}

/// Parses a wire message from the server.
///
/// Both text and binary frames carry JSON. Returns `Ok(None)` for a close
/// frame.
///
/// # Errors
///
/// Returns [`VoiceError::Protocol`] if the payload is not a server message.
pub fn parse_server_message(message: &WireMessage) -> Result<Option<ServerMessage>, VoiceError> {
    let parsed = match message {
        WireMessage::Text(text) => serde_json::from_str(text),
        WireMessage::Binary(bytes) => serde_json::from_slice(bytes),
        WireMessage::Close => return Ok(None),
    };
    parsed
        .map(Some)
        .map_err(|e| VoiceError::Protocol(format!("malformed server message: {e}")))
}

impl ServerMessage {
    /// Returns `true` if this is the setup acknowledgement.
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flattens the message into transport events.
    ///
    /// `Interrupted` comes first so stale audio is cut before any new audio
    /// in the same message, and `TurnComplete` comes last. Audio parts whose
    /// MIME type carries no rate use `default_format`.
    pub fn into_events(self, default_format: AudioFormat) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        if self.is_setup_complete() {
            events.push(InboundEvent::Opened);
        }
        let Some(content) = self.server_content else {
            return events;
        };

        if content.interrupted {
            events.push(InboundEvent::Interrupted);
        }
        let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
        for blob in parts.into_iter().filter_map(|part| part.inline_data) {
            if !blob.mime_type.starts_with("audio/") {
                tracing::debug!(mime_type = %blob.mime_type, "ignoring non-audio part");
                continue;
            }
            let sample_rate = rate_from_mime(&blob.mime_type).unwrap_or(default_format.sample_rate);
            events.push(InboundEvent::AudioChunk {
                data: blob.data,
                sample_rate,
                channels: default_format.channels,
            });
        }
        if content.turn_complete {
            events.push(InboundEvent::TurnComplete);
        }
        events
    }
}

/// Extracts the `rate=` parameter from a MIME type like `audio/pcm;rate=24000`.
fn rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::AudioFrame;

    #[test]
    fn test_setup_message_shape() {
        let json = setup_message("models/test", Some("Be kind.")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["setup"]["model"], "models/test");
        assert_eq!(
            value["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            value["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be kind."
        );
    }

    #[test]
    fn test_setup_without_instruction_omits_field() {
        let json = setup_message("models/test", None).unwrap();
        assert!(!json.contains("systemInstruction"));
    }

    #[test]
    fn test_realtime_input_encodes_pcm() {
        let frame = AudioFrame::new(3, vec![1, -1], Duration::ZERO, AudioFormat::INPUT);
        let json = realtime_input_message(&OutboundPacket::encode(frame)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let chunk = &value["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        // [0x01, 0x00, 0xFF, 0xFF]
        assert_eq!(chunk["data"], "AQD//w==");
    }

    #[test]
    fn test_parse_setup_complete() {
        let message = WireMessage::Text(r#"{"setupComplete":{}}"#.into());
        let parsed = parse_server_message(&message).unwrap().unwrap();
        assert!(parsed.is_setup_complete());
        assert_eq!(
            parsed.into_events(AudioFormat::OUTPUT),
            vec![InboundEvent::Opened]
        );
    }

    #[test]
    fn test_parse_binary_frames_as_json() {
        let message = WireMessage::Binary(br#"{"serverContent":{"turnComplete":true}}"#.to_vec());
        let parsed = parse_server_message(&message).unwrap().unwrap();
        assert_eq!(
            parsed.into_events(AudioFormat::OUTPUT),
            vec![InboundEvent::TurnComplete]
        );
    }

    #[test]
    fn test_event_order_within_one_message() {
        let json = r#"{
            "serverContent": {
                "interrupted": true,
                "turnComplete": true,
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}},
                    {"text": "ignored"},
                    {"inlineData": {"mimeType": "audio/pcm", "data": "BBB="}}
                ]}
            }
        }"#;
        let parsed = parse_server_message(&WireMessage::Text(json.into()))
            .unwrap()
            .unwrap();
        let events = parsed.into_events(AudioFormat::new(22050, 1));
        assert_eq!(
            events,
            vec![
                InboundEvent::Interrupted,
                InboundEvent::AudioChunk {
                    data: "AAA=".into(),
                    sample_rate: 24000,
                    channels: 1,
                },
                InboundEvent::AudioChunk {
                    data: "BBB=".into(),
                    sample_rate: 22050,
                    channels: 1,
                },
                InboundEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_malformed_message_is_protocol_error() {
        let result = parse_server_message(&WireMessage::Text("not json".into()));
        assert!(matches!(result, Err(VoiceError::Protocol(_))));
    }

    #[test]
    fn test_close_frame_parses_to_none() {
        assert!(parse_server_message(&WireMessage::Close).unwrap().is_none());
    }

    #[test]
    fn test_rate_from_mime() {
        assert_eq!(rate_from_mime("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(rate_from_mime("audio/pcm; rate=16000"), Some(16000));
        assert_eq!(rate_from_mime("audio/pcm"), None);
    }
}
