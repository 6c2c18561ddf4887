//! JSON frames of the live-session WebSocket protocol.

use serde::{Deserialize, Serialize};

use crate::audio::{EncodedChunk, InboundAudio};
use crate::transport::{ServerMessage, StreamConfig};

// ---------------- client → server ----------------

/// First frame after the socket opens.
#[derive(Serialize, Debug)]
pub struct SetupMessage {
    setup: Setup,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<crate::transport::ResponseFormat>,
    speech_config: SpeechConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

impl SetupMessage {
    pub fn new(model: &str, config: &StreamConfig) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{}", model)
        };
        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec![config.response_format],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: config.voice.clone(),
                            },
                        },
                    },
                },
            },
        }
    }
}

/// Streaming microphone input.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<Blob>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub data: String,
}

impl RealtimeInputMessage {
    pub fn from_chunk(chunk: &EncodedChunk) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![Blob {
                    mime_type: chunk.mime_type.clone(),
                    data: chunk.to_base64(),
                }],
            },
        }
    }
}

// ---------------- server → client ----------------

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerFrame {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
    pub model_turn: Option<ModelTurn>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub inline_data: Option<Blob>,
    pub text: Option<String>,
}

impl ServerFrame {
    /// Split a frame into the pipeline messages it carries.
    ///
    /// An interruption comes first so that any audio in the same frame is
    /// treated as post-interruption audio.
    pub fn into_messages(self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        let Some(content) = self.server_content else {
            return messages;
        };

        if content.interrupted {
            messages.push(ServerMessage::interrupted());
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(blob) = part.inline_data {
                    messages.push(ServerMessage::audio(InboundAudio {
                        mime_type: blob.mime_type,
                        data: blob.data,
                    }));
                }
            }
        }
        messages
    }
}
