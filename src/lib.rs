//! Per-session dialog orchestrator for a real-time voice conversation
//! server: transcribes streamed microphone audio, drives an LLM reply,
//! synthesizes speech, and streams both back with barge-in semantics.
//!
//! Module layout mirrors the components this core composes (C1-C9):
//! `protocol` (C1), `vad` (C2), `stt` (C3), `turn_controller` (C4),
//! `llm` (C5), `chunker` (C6), `tts` (C7), `egress` (C8), `cache` (C9).

pub mod agent;
pub mod cache;
pub mod cancel;
pub mod chunker;
pub mod config;
pub mod egress;
pub mod error;
pub mod ids;
pub mod llm;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stt;
pub mod tts;
pub mod turn_controller;
pub mod vad;
