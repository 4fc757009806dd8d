//! Cooperative cancellation signal shared between the turn controller and
//! its async workers (LLM reader, TTS pool). Grounded in
//! `streaming-core::pipeline::Pipeline`'s `cancel_tx`/`cancel_rx` pair,
//! checked via `try_recv` at each loop iteration — same idea, backed by an
//! `AtomicBool` instead of a channel since workers only need a flag, not a
//! payload, and `is_cancelled` must be checkable without `.await`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled_and_latches_once_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
