//! TTS synthesizer (C7). One request per synthesis unit, result
//! stored as an artifact (C9) by the caller. Shaped after
//! `voice::tts_service`'s provider-trait-returns-bytes pattern.

pub mod openai;
pub mod silence;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TtsError {
    #[error("tts provider error: {0}")]
    Provider(String),
    #[error("tts unit timed out")]
    Timeout,
}

pub struct Synthesized {
    pub audio_bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Per-session voice settings carried to every synthesis call.
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub voice_id: String,
    pub speaking_speed: f32,
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<Synthesized, TtsError>;
}
