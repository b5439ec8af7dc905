//! Wire messages for the bidirectional voice channel.
//!
//! The transport owns the framing; this module only models the JSON
//! payloads the core actually produces and consumes: the session `setup`
//! handshake, outbound realtime audio chunks, and the `serverContent`
//! union (inline audio, interruption, transcription fragments).

use serde::{Deserialize, Serialize};

use super::{InboundEvent, Speaker};
use crate::pcm::{self, WireAudioPacket};

/// Output audio sample rate the agent synthesizes at, used when an inbound
/// MIME tag omits the rate.
pub const DEFAULT_OUTPUT_RATE: u32 = 24_000;

// ── Outbound: session setup ─────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: TextContent,
    pub input_audio_transcription: EmptyConfig,
    pub output_audio_transcription: EmptyConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Presence-only configuration object (serializes as `{}`).
#[derive(Debug, Default, Serialize)]
pub struct EmptyConfig {}

#[derive(Debug, Serialize)]
pub struct TextContent {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

impl SetupMessage {
    pub fn new(model: &str, voice_name: &str, system_instruction: &str) -> Self {
        Self {
            setup: Setup {
                model: format!("models/{model}"),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice_name.to_string(),
                            },
                        },
                    },
                },
                system_instruction: TextContent {
                    parts: vec![TextPart {
                        text: system_instruction.to_string(),
                    }],
                },
                input_audio_transcription: EmptyConfig {},
                output_audio_transcription: EmptyConfig {},
            },
        }
    }
}

// ── Outbound: realtime audio ────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl RealtimeInputMessage {
    /// Wrap one encoded frame as a realtime media chunk.
    pub fn audio(packet: &WireAudioPacket) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: packet.mime_type.clone(),
                    data: pcm::to_transport_text(&packet.data),
                }],
            },
        }
    }
}

// ── Inbound ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub interrupted: Option<bool>,
    pub turn_complete: Option<bool>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ModelTurn {
    pub parts: Vec<InlinePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InlinePart {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Transcription {
    pub text: Option<String>,
}

/// Pull the sample rate out of a `audio/pcm;rate=24000` style MIME tag.
pub fn parse_pcm_rate(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|part| part.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}

/// Demultiplex one server message into inbound events, in the order the
/// payloads are consumed: audio segments, interruption, transcription.
pub fn demux(message: ServerMessage) -> Vec<InboundEvent> {
    let mut events = Vec::new();
    let Some(content) = message.server_content else {
        return events;
    };

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            let Some(inline) = part.inline_data else {
                continue;
            };
            if !inline.mime_type.starts_with("audio/pcm") {
                continue;
            }
            match pcm::from_transport_text(&inline.data) {
                Ok(data) => events.push(InboundEvent::AudioSegment {
                    data,
                    sample_rate: parse_pcm_rate(&inline.mime_type).unwrap_or(DEFAULT_OUTPUT_RATE),
                    channels: 1,
                }),
                Err(e) => {
                    tracing::warn!("Discarding audio part with bad transport encoding: {e}");
                }
            }
        }
    }

    if content.interrupted == Some(true) {
        events.push(InboundEvent::Interrupted);
    }

    if let Some(out) = content.output_transcription {
        if let Some(text) = out.text.filter(|t| !t.is_empty()) {
            events.push(InboundEvent::TranscriptFragment {
                speaker: Speaker::Examiner,
                text,
            });
        }
    } else if let Some(input) = content.input_transcription {
        if let Some(text) = input.text.filter(|t| !t.is_empty()) {
            events.push(InboundEvent::TranscriptFragment {
                speaker: Speaker::Candidate,
                text,
            });
        }
    }

    events
}
