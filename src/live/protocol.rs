//! Wire types for the live voice endpoint.
//!
//! The protocol is JSON over WebSocket. The client opens with a `setup`
//! message and then streams `realtimeInput` audio chunks; the server
//! acknowledges with `setupComplete` and interleaves `serverContent`
//! messages carrying synthesized audio, transcriptions, and turn
//! boundaries.
//!
//! Outbound setup frame:
//!
//! ```json
//! {
//!   "setup": {
//!     "model": "models/gemini-2.5-flash-native-audio-preview-09-2025",
//!     "generationConfig": {
//!       "responseModalities": ["AUDIO"],
//!       "speechConfig": {
//!         "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": "Kore" } }
//!       }
//!     },
//!     "systemInstruction": { "parts": [{ "text": "..." }] },
//!     "inputAudioTranscription": {},
//!     "outputAudioTranscription": {}
//!   }
//! }
//! ```
//!
//! Outbound audio frame:
//!
//! ```json
//! {
//!   "realtimeInput": {
//!     "mediaChunks": [{ "mimeType": "audio/pcm;rate=16000", "data": "<b64>" }]
//!   }
//! }
//! ```
//!
//! Inbound messages are parsed tolerantly: unknown fields are ignored and
//! every known field is optional, so protocol additions on the server side
//! never break the client.

use serde::{Deserialize, Serialize};

use crate::audio::CAPTURE_SAMPLE_RATE;
use crate::error::VoiceError;

// ---------------------------------------------------------------------------
// Outbound (client → server)
// ---------------------------------------------------------------------------

/// Top-level frame sent by the client. Exactly one field is populated per
/// frame; `None` fields are omitted from the JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup: Option<Setup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_input: Option<RealtimeInput>,
}

impl ClientMessage {
    /// Build the opening `setup` frame.
    pub fn setup(model: &str, voice: &str, system_instruction: &str) -> Self {
        Self {
            setup: Some(Setup {
                model: format!("models/{model}"),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice.to_string(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![Part {
                        text: system_instruction.to_string(),
                    }],
                },
                input_audio_transcription: Empty {},
                output_audio_transcription: Empty {},
            }),
            realtime_input: None,
        }
    }

    /// Build a `realtimeInput` frame carrying one base64 PCM chunk at the
    /// capture rate.
    pub fn realtime_audio(base64_pcm: String) -> Self {
        Self {
            setup: None,
            realtime_input: Some(RealtimeInput {
                media_chunks: vec![Blob {
                    mime_type: format!("audio/pcm;rate={CAPTURE_SAMPLE_RATE}"),
                    data: base64_pcm,
                }],
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub input_audio_transcription: Empty,
    pub output_audio_transcription: Empty,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// Serializes as `{}`; the endpoint treats the presence of the key as the
/// feature toggle.
#[derive(Debug, Clone, Serialize)]
pub struct Empty {}

// ---------------------------------------------------------------------------
// Inbound (server → client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub output_transcription: Option<Transcription>,
    pub input_transcription: Option<Transcription>,
    pub turn_complete: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelTurn {
    pub parts: Vec<InboundPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InboundPart {
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Transcription {
    pub text: String,
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// One semantic event extracted from an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Setup handshake acknowledged.
    SetupComplete,
    /// Base64 PCM16 audio payload from a response turn.
    Audio { data: String },
    /// Transcription fragment; `is_user` distinguishes the user's speech
    /// from the assistant's.
    Transcript { text: String, is_user: bool },
    /// The server finished its current response turn.
    TurnComplete,
}

/// Parse one inbound frame and classify everything it carries, in the
/// order the rest of the pipeline consumes it: audio first, then exactly
/// one transcription (the assistant's wins when both are present), then
/// the turn boundary.
///
/// Returns an empty vec for well-formed JSON that carries nothing we
/// handle; an `Err` only when the payload is not valid JSON for the
/// message shape.
pub fn classify(raw: &str) -> Result<Vec<ServerEvent>, VoiceError> {
    let msg: ServerMessage =
        serde_json::from_str(raw).map_err(|e| VoiceError::Protocol(e.to_string()))?;

    let mut events = Vec::new();

    if msg.setup_complete.is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(content) = msg.server_content {
        if let Some(turn) = content.model_turn {
            if let Some(data) = turn.parts.into_iter().find_map(|p| p.inline_data) {
                if !data.data.is_empty() {
                    events.push(ServerEvent::Audio { data: data.data });
                }
            }
        }

        if let Some(t) = content.output_transcription {
            events.push(ServerEvent::Transcript {
                text: t.text,
                is_user: false,
            });
        } else if let Some(t) = content.input_transcription {
            events.push(ServerEvent::Transcript {
                text: t.text,
                is_user: true,
            });
        }

        if content.turn_complete == Some(true) {
            events.push(ServerEvent::TurnComplete);
        }
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_frame_shape() {
        let msg = ClientMessage::setup("test-model", "Kore", "Be helpful.");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["setup"]["model"], "models/test-model");
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(
            json["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be helpful."
        );
        // Transcription toggles are present as empty objects.
        assert!(json["setup"]["inputAudioTranscription"].is_object());
        assert!(json["setup"]["outputAudioTranscription"].is_object());
        // No stray realtimeInput key on a setup frame.
        assert!(json.get("realtimeInput").is_none());
    }

    #[test]
    fn test_realtime_audio_frame_shape() {
        let msg = ClientMessage::realtime_audio("AAAA".to_string());
        let json = serde_json::to_value(&msg).unwrap();

        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AAAA");
        assert!(json.get("setup").is_none());
    }

    #[test]
    fn test_classify_setup_complete() {
        let events = classify(r#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(events, vec![ServerEvent::SetupComplete]);
    }

    #[test]
    fn test_classify_audio_part() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQID"}}
                    ]
                }
            }
        }"#;
        let events = classify(raw).unwrap();
        assert_eq!(
            events,
            vec![ServerEvent::Audio {
                data: "AQID".to_string()
            }]
        );
    }

    #[test]
    fn test_classify_skips_parts_without_audio() {
        // Text-only parts ahead of the audio part must not hide it.
        let raw = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"text": "thinking"},
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQID"}}
                    ]
                }
            }
        }"#;
        let events = classify(raw).unwrap();
        assert_eq!(
            events,
            vec![ServerEvent::Audio {
                data: "AQID".to_string()
            }]
        );
    }

    #[test]
    fn test_classify_output_transcription() {
        let raw = r#"{"serverContent":{"outputTranscription":{"text":"Hi there"}}}"#;
        let events = classify(raw).unwrap();
        assert_eq!(
            events,
            vec![ServerEvent::Transcript {
                text: "Hi there".to_string(),
                is_user: false
            }]
        );
    }

    #[test]
    fn test_classify_input_transcription() {
        let raw = r#"{"serverContent":{"inputTranscription":{"text":"hello"}}}"#;
        let events = classify(raw).unwrap();
        assert_eq!(
            events,
            vec![ServerEvent::Transcript {
                text: "hello".to_string(),
                is_user: true
            }]
        );
    }

    #[test]
    fn test_output_transcription_wins_over_input() {
        let raw = r#"{
            "serverContent": {
                "outputTranscription": {"text": "assistant"},
                "inputTranscription": {"text": "user"}
            }
        }"#;
        let events = classify(raw).unwrap();
        assert_eq!(
            events,
            vec![ServerEvent::Transcript {
                text: "assistant".to_string(),
                is_user: false
            }]
        );
    }

    #[test]
    fn test_classify_combined_message_orders_audio_first() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm", "data": "AQID"}}]},
                "outputTranscription": {"text": "Hi"},
                "turnComplete": true
            }
        }"#;
        let events = classify(raw).unwrap();
        assert_eq!(
            events,
            vec![
                ServerEvent::Audio {
                    data: "AQID".to_string()
                },
                ServerEvent::Transcript {
                    text: "Hi".to_string(),
                    is_user: false
                },
                ServerEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_classify_unknown_fields_ignored() {
        let raw = r#"{"usageMetadata":{"totalTokenCount":42}}"#;
        let events = classify(raw).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_classify_rejects_invalid_json() {
        assert!(classify("not json at all").is_err());
        assert!(classify("").is_err());
    }

    #[test]
    fn test_classify_empty_audio_data_dropped() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm", "data": ""}}]}
            }
        }"#;
        let events = classify(raw).unwrap();
        assert!(events.is_empty());
    }
}
