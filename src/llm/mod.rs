//! LLM stream adapter (C5).
//!
//! Takes a dialog history plus derived system prompt and dynamic
//! context, returns a lazy, cancellable sequence of text fragments. Shaped
//! after `voice::tts_service`/`voice::stt_service`'s adapter-trait-plus-
//! `CancelToken` pattern, applied to chat completion streaming.

pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

use crate::cancel::CancelToken;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm provider error: {0}")]
    Provider(String),
}

/// One message in the running dialog, role-tagged the same way as
/// `protocol::HistoryEntry` but independent of the wire type, since the
/// system prompt and dynamic-context messages the adapter prepends are not
/// part of the client-visible history.
#[derive(Debug, Clone)]
pub struct DialogMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A lazy sequence of text fragments. `None` from `next_fragment` means the
/// stream ended normally or was cancelled; `partial_failure` distinguishes
/// the two so the caller can still treat whatever text arrived as the
/// turn's assistant content ( "emits the fragments received so
/// far and reports `llm_partial_failure`").
#[async_trait]
pub trait LlmStream: Send {
    /// Pull the next fragment, or `None` at end-of-stream/cancellation.
    async fn next_fragment(&mut self) -> Option<String>;

    /// Set after `next_fragment` returns `None`, if the stream ended due to
    /// a provider error rather than completing cleanly.
    fn partial_failure(&self) -> Option<&LlmError>;
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Start a request; `cancel` lets the turn controller cooperatively
    /// cancel the stream on barge-in.
    async fn start(
        &self,
        model: &str,
        history: Vec<DialogMessage>,
        cancel: CancelToken,
    ) -> Result<Box<dyn LlmStream>, LlmError>;
}

/// Test double yielding fixed fragments one at a time, used by scenario
/// tests that don't exercise the OpenAI adapter.
pub struct ScriptedLlm {
    pub fragments: Vec<String>,
}

pub struct ScriptedLlmStream {
    remaining: std::collections::VecDeque<String>,
    cancel: CancelToken,
}

#[async_trait]
impl LlmStream for ScriptedLlmStream {
    async fn next_fragment(&mut self) -> Option<String> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.remaining.pop_front()
    }

    fn partial_failure(&self) -> Option<&LlmError> {
        None
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn start(
        &self,
        _model: &str,
        _history: Vec<DialogMessage>,
        cancel: CancelToken,
    ) -> Result<Box<dyn LlmStream>, LlmError> {
        Ok(Box::new(ScriptedLlmStream { remaining: self.fragments.clone().into(), cancel }))
    }
}
