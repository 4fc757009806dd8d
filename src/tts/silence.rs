//! Test double returning a fixed silent WAV body, grounded in the same
//! role `voice::tts`'s silence/mock backend plays: exercise the TTS seam
//! (pipelining, cache insertion, failure handling) without a live provider.

use async_trait::async_trait;

use super::{Synthesized, TextToSpeech, TtsError, VoiceSettings};

pub struct SilenceTts {
    /// When set, `synthesize` fails instead, to exercise the
    /// on-synthesis-failure path in tests.
    pub fail: bool,
}

impl SilenceTts {
    pub fn new() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl Default for SilenceTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextToSpeech for SilenceTts {
    async fn synthesize(&self, _text: &str, _voice: &VoiceSettings) -> Result<Synthesized, TtsError> {
        if self.fail {
            return Err(TtsError::Provider("synthesis unavailable in test double".into()));
        }
        // A minimal valid WAV header over 8kHz mono silence is overkill for
        // a test double; callers only assert on presence/absence and size.
        Ok(Synthesized { audio_bytes: vec![0u8; 16], content_type: "audio/wav" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_bytes_by_default() {
        let tts = SilenceTts::new();
        let voice = VoiceSettings { voice_id: "default".into(), speaking_speed: 1.0 };
        let out = tts.synthesize("hello", &voice).await.unwrap();
        assert_eq!(out.audio_bytes.len(), 16);
    }

    #[tokio::test]
    async fn failing_double_errors() {
        let tts = SilenceTts::failing();
        let voice = VoiceSettings { voice_id: "default".into(), speaking_speed: 1.0 };
        assert!(tts.synthesize("hello", &voice).await.is_err());
    }
}
