//! Streaming STT stream adapter (C3).
//!
//! The trait models a provider session: open, push PCM frames, receive
//! an ordered stream of interim/final transcript events, close. Shaped
//! after `voice::stt::SpeechToText`, but adapter-style
//! (push frames, poll events) instead of one-shot `transcribe`, since this
//! core needs transcripts *during* the utterance, not only after it.

pub mod mock;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::ids::Generation;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SttError {
    #[error("stt connection dropped mid-utterance: {0}")]
    ConnectionDropped(String),
    #[error("stt provider error: {0}")]
    Provider(String),
}

/// One transcript event surfaced to the turn controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Unstable, possibly-revised hypothesis.
    Interim { text: String, generation: Generation },
    /// Stable text at end-of-utterance.
    Final { text: String, generation: Generation },
    /// The adapter reports a failure to the turn controller.
    Failed { generation: Generation, error: SttError },
}

/// A single streaming STT session, opened lazily on first `speech_start`
///.
#[async_trait]
pub trait SttSession: Send {
    /// Push one 30ms PCM frame captured at the given generation.
    async fn push_frame(&mut self, generation: Generation, frame: &[i16]);

    /// Signal end-of-utterance; no more frames will be pushed on this
    /// session. The adapter should emit a final `TranscriptEvent` (or
    /// `Failed`) shortly after.
    async fn close(&mut self);
}

/// Opens streaming STT sessions and hands back both the session handle and
/// the channel its events arrive on.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn open_session(&self, generation: Generation) -> (Box<dyn SttSession>, mpsc::Receiver<TranscriptEvent>);
}
