//! Voice-activity detection (C2).
//!
//! `VoiceActivityDetector` classifies fixed-size 30 ms frames; `EdgeDetector`
//! (submodule `edge`) turns the raw per-frame classification into debounced
//! `speech_start`/`speech_end` events plus the pre-speech ring buffer: the
//! classifier and the edge-detection state machine are kept as separate
//! seams, same split `streaming-core` uses between its VAD classifier and
//! its orchestrator's edge logic.

pub mod earshot_vad;
pub mod edge;

pub use earshot_vad::EarshotVad;
pub use edge::{EdgeDetector, VadEvent};

/// Samples per frame at 8 kHz / 30 ms.
pub const FRAME_SAMPLES: usize = 240;

/// A speech/non-speech classifier over one fixed-size frame.
///
/// Mirrors `voice::vad::VoiceActivityDetection`, narrowed to the single
/// frame size this core operates on — no confidence score, since the edge
/// detector's N/M debouncing only needs the binary decision, not a
/// confidence curve.
pub trait VoiceActivityDetector: Send + Sync {
    /// Classify one 240-sample (30 ms @ 8 kHz) frame.
    fn is_speech(&self, frame: &[i16]) -> Result<bool, VadError>;
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum VadError {
    #[error("frame must be exactly {FRAME_SAMPLES} samples, got {0}")]
    WrongFrameSize(usize),
    #[error("classifier failure: {0}")]
    ClassifierFailed(String),
}
