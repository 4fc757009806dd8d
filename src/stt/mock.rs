//! Deterministic mock STT, grounded in `voice::stt::stub::StubSTT`'s
//! duration-based dummy-text approach, adapted to the streaming interim/
//! final contract this core needs. No real speech recognition:
//! accumulated sample count maps to canned text, split into a growing
//! interim sequence before the final.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{SpeechToText, SttSession, TranscriptEvent};
use crate::ids::Generation;

const MIN_SAMPLES_FOR_TRANSCRIPT: usize = 4000; // 500ms @ 8kHz

fn dummy_text(total_samples: usize) -> String {
    let duration_ms = (total_samples * 1000) / 8000;
    match duration_ms {
        0..=999 => "Test.".to_string(),
        1000..=1999 => "Test audio transcription.".to_string(),
        _ => "This is a test audio transcription from the mock adapter.".to_string(),
    }
}

pub struct MockStt;

impl MockStt {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockStt {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MockSttSession {
    tx: mpsc::Sender<TranscriptEvent>,
    total_samples: usize,
    emitted_interim: bool,
    final_generation: Generation,
}

#[async_trait]
impl SttSession for MockSttSession {
    async fn push_frame(&mut self, generation: Generation, frame: &[i16]) {
        self.total_samples += frame.len();
        if !self.emitted_interim && self.total_samples >= MIN_SAMPLES_FOR_TRANSCRIPT {
            self.emitted_interim = true;
            let words: Vec<&str> = dummy_text(self.total_samples).split_whitespace().collect();
            let partial = words.first().copied().unwrap_or_default().to_string();
            let _ = self.tx.send(TranscriptEvent::Interim { text: partial, generation }).await;
        }
    }

    async fn close(&mut self) {
        if self.total_samples < MIN_SAMPLES_FOR_TRANSCRIPT {
            return;
        }
        let text = dummy_text(self.total_samples);
        let _ = self.tx.send(TranscriptEvent::Final { text, generation: self.final_generation }).await;
    }
}

impl MockSttSession {
    fn new(tx: mpsc::Sender<TranscriptEvent>, generation: Generation) -> Self {
        Self { tx, total_samples: 0, emitted_interim: false, final_generation: generation }
    }
}

#[async_trait]
impl SpeechToText for MockStt {
    async fn open_session(&self, generation: Generation) -> (Box<dyn SttSession>, mpsc::Receiver<TranscriptEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (Box::new(MockSttSession::new(tx, generation)), rx)
    }
}
