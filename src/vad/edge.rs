//! Debounced speech_start/speech_end edge detection plus the pre-speech
//! ring buffer. Grounded in the orchestration loop in
//! `voice::orchestrator` that drives VAD classifications into edges, but
//! pulled out as its own unit the way `ring.rs` is its own module in
//! `streaming-core` rather than inlined into the call server.

use std::collections::VecDeque;

use super::FRAME_SAMPLES;
use crate::config::VadConfig;

/// An edge or forwarded frame produced by the detector for one classified
/// input frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VadEvent {
    /// N consecutive speech frames observed; `frames` is the pre-speech
    /// ring buffer content that must be flushed to STT ahead of new audio.
    SpeechStart { replay: Vec<[i16; FRAME_SAMPLES]> },
    /// While speech is active, each classified frame is forwarded as-is.
    Frame([i16; FRAME_SAMPLES]),
    /// M consecutive non-speech frames observed after speech was active.
    SpeechEnd,
    /// Still inactive; frame absorbed into the pre-speech ring, nothing to
    /// forward yet.
    Buffered,
}

/// Stateful debouncer. One instance per session, fed one classified frame
/// at a time by the VAD worker loop.
pub struct EdgeDetector {
    speech_start_frames: u32,
    speech_end_frames: u32,
    pre_speech_ring: VecDeque<[i16; FRAME_SAMPLES]>,
    ring_capacity: usize,
    consecutive_speech: u32,
    consecutive_silence: u32,
    speaking: bool,
}

impl EdgeDetector {
    pub fn new(config: &VadConfig) -> Self {
        // 30ms per frame; round up so the buffer covers at least the
        // configured pre-speech window.
        let ring_capacity =
            ((config.pre_speech_buffer_ms as usize) / 30).max(1);
        Self {
            speech_start_frames: config.speech_start_frames,
            speech_end_frames: config.speech_end_frames,
            pre_speech_ring: VecDeque::with_capacity(ring_capacity),
            ring_capacity,
            consecutive_speech: 0,
            consecutive_silence: 0,
            speaking: false,
        }
    }

    /// Feed one classified frame, returning the event it produces.
    pub fn push(&mut self, frame: [i16; FRAME_SAMPLES], is_speech: bool) -> VadEvent {
        if self.speaking {
            if is_speech {
                self.consecutive_silence = 0;
                return VadEvent::Frame(frame);
            }
            self.consecutive_silence += 1;
            if self.consecutive_silence >= self.speech_end_frames {
                self.speaking = false;
                self.consecutive_speech = 0;
                self.consecutive_silence = 0;
                return VadEvent::SpeechEnd;
            }
            // Still within the trailing-silence debounce window: keep
            // forwarding, a final transcript hasn't fired yet.
            return VadEvent::Frame(frame);
        }

        if is_speech {
            self.consecutive_speech += 1;
            self.consecutive_silence = 0;
            if self.consecutive_speech >= self.speech_start_frames {
                self.speaking = true;
                self.consecutive_speech = 0;
                let replay: Vec<_> = self.pre_speech_ring.drain(..).collect();
                return VadEvent::SpeechStart { replay };
            }
            self.buffer(frame);
            VadEvent::Buffered
        } else {
            self.consecutive_speech = 0;
            self.buffer(frame);
            VadEvent::Buffered
        }
    }

    fn buffer(&mut self, frame: [i16; FRAME_SAMPLES]) {
        if self.pre_speech_ring.len() == self.ring_capacity {
            self.pre_speech_ring.pop_front();
        }
        self.pre_speech_ring.push_back(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(v: i16) -> [i16; FRAME_SAMPLES] {
        [v; FRAME_SAMPLES]
    }

    fn config() -> VadConfig {
        VadConfig { aggressiveness: 2, speech_start_frames: 3, speech_end_frames: 3, pre_speech_buffer_ms: 60 }
    }

    #[test]
    fn fires_speech_start_after_n_frames_and_replays_ring() {
        let mut det = EdgeDetector::new(&config());
        assert_eq!(det.push(frame(0), false), VadEvent::Buffered);
        assert_eq!(det.push(frame(1), false), VadEvent::Buffered);
        assert_eq!(det.push(frame(2), true), VadEvent::Buffered);
        assert_eq!(det.push(frame(3), true), VadEvent::Buffered);

        let event = det.push(frame(4), true);
        match event {
            VadEvent::SpeechStart { replay } => {
                // ring_capacity = 60/30 = 2, so only the last 2 buffered frames survive
                assert_eq!(replay.len(), 2);
                assert_eq!(replay[0], frame(1));
                assert_eq!(replay[1], frame(2));
            }
            other => panic!("expected SpeechStart, got {other:?}"),
        }
    }

    #[test]
    fn fires_speech_end_after_m_silence_frames() {
        let mut det = EdgeDetector::new(&config());
        for _ in 0..3 {
            det.push(frame(9), true);
        }
        let _ = det.push(frame(9), true); // SpeechStart
        assert_eq!(det.push(frame(9), false), VadEvent::Frame(frame(9)));
        assert_eq!(det.push(frame(9), false), VadEvent::Frame(frame(9)));
        assert_eq!(det.push(frame(9), false), VadEvent::SpeechEnd);
    }

    #[test]
    fn brief_dropout_during_speech_does_not_fire_end() {
        let mut det = EdgeDetector::new(&config());
        for _ in 0..4 {
            det.push(frame(1), true); // enters speaking on the 3rd
        }
        det.push(frame(1), false);
        // speech resumes before M=3 silence frames accumulate
        let event = det.push(frame(1), true);
        assert_eq!(event, VadEvent::Frame(frame(1)));
    }
}
