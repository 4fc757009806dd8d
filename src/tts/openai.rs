//! Concrete `TextToSpeech` backed by `async-openai`'s non-streaming speech
//! endpoint (`Audio::speech`, returns the full MP3 body in one response) —
//! a closer fit than `speech_stream` for this core's per-unit contract,
//! which wants one complete artifact per synthesis unit, not a sub-unit
//! audio delta stream.

use async_openai::config::OpenAIConfig;
use async_openai::types::audio::{CreateSpeechRequestArgs, SpeechModel, Voice};
use async_openai::Client;
use async_trait::async_trait;

use super::{Synthesized, TextToSpeech, TtsError, VoiceSettings};

pub struct OpenAiTts {
    client: Client<OpenAIConfig>,
    model: SpeechModel,
}

impl OpenAiTts {
    pub fn new() -> Self {
        Self { client: Client::new(), model: SpeechModel::Gpt4oMiniTts }
    }
}

impl Default for OpenAiTts {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_voice(voice_id: &str) -> Voice {
    match voice_id {
        "alloy" => Voice::Alloy,
        "echo" => Voice::Echo,
        "fable" => Voice::Fable,
        "onyx" => Voice::Onyx,
        "nova" => Voice::Nova,
        "shimmer" => Voice::Shimmer,
        _ => Voice::Alloy,
    }
}

#[async_trait]
impl TextToSpeech for OpenAiTts {
    async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<Synthesized, TtsError> {
        let request = CreateSpeechRequestArgs::default()
            .input(text)
            .voice(resolve_voice(&voice.voice_id))
            .speed(voice.speaking_speed)
            .model(self.model.clone())
            .build()
            .map_err(|e| TtsError::Provider(e.to_string()))?;

        let response = self
            .client
            .audio()
            .speech(request)
            .await
            .map_err(|e| TtsError::Provider(e.to_string()))?;

        Ok(Synthesized { audio_bytes: response.bytes.to_vec(), content_type: "audio/mpeg" })
    }
}
