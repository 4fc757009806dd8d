//! Default classifier backend: `earshot`, a pure-Rust port of WebRTC's VAD.
//! Grounded in `voice::vad::webrtc::WebRtcVAD`, adapted to the 8 kHz /
//! 240-sample frame this core always hands it, so no chunking or
//! majority-voting fallback is needed.

use earshot::{VoiceActivityDetector as Earshot, VoiceActivityProfile};
use parking_lot::Mutex;

use super::{VadError, VoiceActivityDetector, FRAME_SAMPLES};

fn profile_for(aggressiveness: u8) -> VoiceActivityProfile {
    match aggressiveness.min(3) {
        0 => VoiceActivityProfile::QUALITY,
        1 => VoiceActivityProfile::LBR,
        2 => VoiceActivityProfile::AGGRESSIVE,
        _ => VoiceActivityProfile::VERY_AGGRESSIVE,
    }
}

pub struct EarshotVad {
    detector: Mutex<Earshot>,
}

impl EarshotVad {
    pub fn new(aggressiveness: u8) -> Self {
        Self { detector: Mutex::new(Earshot::new(profile_for(aggressiveness))) }
    }
}

impl VoiceActivityDetector for EarshotVad {
    fn is_speech(&self, frame: &[i16]) -> Result<bool, VadError> {
        if frame.len() != FRAME_SAMPLES {
            return Err(VadError::WrongFrameSize(frame.len()));
        }
        self.detector
            .lock()
            .predict_8khz(frame)
            .map_err(|e| VadError::ClassifierFailed(format!("{e:?}")))
    }
}
