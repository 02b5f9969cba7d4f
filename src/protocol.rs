//! JSON wire messages exchanged with the translation service.

use serde::{Deserialize, Serialize};

/// Audio stream parameters declared in the hello message.
#[derive(Serialize)]
pub struct AudioParams {
    pub format: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub frame_duration: u32,
}

/// Language pair for the translation session.
#[derive(Serialize)]
pub struct TranslationParams {
    pub source: String,
    pub target: String,
}

/// First message on the channel, declaring stream format and languages.
#[derive(Serialize)]
pub struct HelloMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub version: u8,
    pub transport: String,
    pub audio_params: AudioParams,
    pub translation: TranslationParams,
}

/// Outbound audio frame envelope.
#[derive(Serialize)]
pub struct AudioMessage<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'a str,
    pub data: &'a str,
}

impl<'a> AudioMessage<'a> {
    pub fn new(data: &'a str) -> Self {
        Self {
            msg_type: "audio",
            data,
        }
    }
}

/// Any message the service sends us. Unknown types are logged and skipped.
#[derive(Deserialize, Debug, Clone)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub data: Option<String>,
    pub message: Option<String>,
    pub session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_audio_message_parses() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"audio","data":"AAAA","session_id":"s1"}"#).unwrap();
        assert_eq!(msg.msg_type, "audio");
        assert_eq!(msg.data.as_deref(), Some("AAAA"));
        assert_eq!(msg.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn server_interrupted_message_parses_without_payload() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"interrupted"}"#).unwrap();
        assert_eq!(msg.msg_type, "interrupted");
        assert!(msg.data.is_none());
    }

    #[test]
    fn audio_envelope_serializes() {
        let json = serde_json::to_string(&AudioMessage::new("UExN")).unwrap();
        assert_eq!(json, r#"{"type":"audio","data":"UExN"}"#);
    }
}
