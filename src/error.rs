//! Crate-wide error taxonomy.
//!
//! Cancellation is deliberately not a variant here: it is never surfaced
//! as an error. Workers signal cancellation by simply stopping and
//! dropping their handle; the turn controller never sees a
//! `DialogError::Cancelled`.

use thiserror::Error;

/// The five error kinds that can reach the client as an `error` egress
/// marker or close the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DialogError {
    /// Malformed or unexpected control frame. Fatal to the session.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// STT/LLM/TTS temporary failure. Non-fatal; the affected turn surfaces
    /// an `error` marker and the session returns to IDLE.
    #[error("provider transient failure ({provider}): {message}")]
    ProviderTransient { provider: &'static str, message: String },

    /// Authentication or quota failure. Non-recoverable for the session.
    #[error("provider fatal failure ({provider}): {message}")]
    ProviderFatal { provider: &'static str, message: String },

    /// A named timeout fired. Behaves as provider-transient for
    /// the affected turn.
    #[error("timeout: {0}")]
    Timeout(&'static str),

    /// Retrieval of a cached audio artifact failed (id unknown or expired).
    #[error("artifact not found: {0}")]
    CacheMiss(String),
}

impl DialogError {
    /// Whether this error kind should close the session outright.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DialogError::Protocol(_) | DialogError::ProviderFatal { .. })
    }

    /// `kind` field used on the egress `error` marker.
    pub fn kind(&self) -> &'static str {
        match self {
            DialogError::Protocol(_) => "protocol_error",
            DialogError::ProviderTransient { .. } => "provider_transient",
            DialogError::ProviderFatal { .. } => "provider_fatal",
            DialogError::Timeout(_) => "timeout",
            DialogError::CacheMiss(_) => "cache_miss",
        }
    }
}
