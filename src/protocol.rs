//! Wire protocol (C1): the typed control frames carried
//! over the duplex client transport, plus the `audio_config` handshake
//! validation. Raw binary frames (PCM) are handled separately by the
//! transport layer — see `server::ws_handler` — the same split
//! `ws_audio::handle_socket` makes between `Message::Text` and
//! `Message::Binary`.

use serde::{Deserialize, Serialize};

use crate::ids::Generation;

/// Handshake payload carried by the first `audio_config` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub encoding: String,
    pub channels: u8,
}

impl AudioConfig {
    /// Accepts exactly {8000, LINEAR16, 1}.
    pub fn is_valid(&self) -> bool {
        self.sample_rate == 8000 && self.encoding == "LINEAR16" && self.channels == 1
    }
}

/// One entry of the `conversation` array on a text-only `message` frame.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

/// Inbound control frames, dispatched by the `type` discriminator.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    AudioConfig(AudioConfig),
    AgentConfig { agent_id: String },
    Message { content: String, #[serde(default)] conversation: Vec<HistoryEntry> },
    Interrupt,
    /// Informational; `caller_id` is forwarded to the LLM as dynamic
    /// context when the selected agent has `inject_caller_info` set.
    CallStarted {
        #[serde(default)]
        caller_id: Option<String>,
    },
    AudioPlaybackComplete,
}

impl ClientMessage {
    /// Parse a textual control frame, returning `None` (with a caller-side
    /// warning) for an unrecognized discriminator rather than a hard error —
    /// "Unknown discriminators are ignored with a warning."
    pub fn parse(raw: &str) -> Result<Option<Self>, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        match value.get("type").and_then(|t| t.as_str()) {
            Some(
                "audio_config" | "agent_config" | "message" | "interrupt" | "call_started"
                | "audio_playback_complete",
            ) => serde_json::from_value(value).map(Some),
            _ => Ok(None),
        }
    }
}

/// Outbound control frames, the full set the client transport carries. Every
/// variant is tagged with `generation` at serialization time by
/// `egress::Egress`, not baked into each construction site, mirroring the
/// single-writer tagging in `ws_audio::OutboundFrame`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    UserTranscript { text: String, timestamp: f64 },
    InterimTranscript { text: String, timestamp: f64 },
    SpeechStart { timestamp: f64 },
    SpeechEnd { timestamp: f64 },
    StreamStart { timestamp: f64 },
    TextChunk { text: String, timestamp: f64 },
    AudioChunk { audio_url: String, text: String, timestamp: f64 },
    StreamComplete { full_text: String, interrupted: bool, timestamp: f64 },
    AgentGreeting { text: String, timestamp: f64 },
    GreetingAudio { audio_url: String, text: String, timestamp: f64 },
    StopAudioImmediately { timestamp: f64 },
    Error { kind: String, message: String, timestamp: f64 },
}

/// A `ServerMessage` paired with the generation it was produced at: the
/// unit the egress multiplexer actually queues and may drop at the head
/// of the queue once superseded.
#[derive(Debug, Clone)]
pub struct Tagged<T> {
    pub generation: Generation,
    pub payload: T,
}

impl<T> Tagged<T> {
    pub fn new(generation: Generation, payload: T) -> Self {
        Self { generation, payload }
    }
}
