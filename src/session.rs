//! Session/Turn/history data model, exclusively owned and
//! mutated by the turn controller.

use crate::agent::AgentConfig;
use crate::ids::{Generation, GenerationCounter, SessionId, TurnId};
use crate::protocol::AudioConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One dialog history entry. Invariant: strictly alternating
/// roles, enforced by `Session::push_history`.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub turn_id: TurnId,
}

/// One emitted audio chunk reference, retained on the turn for bookkeeping
///.
#[derive(Debug, Clone)]
pub struct AudioChunkRef {
    pub artifact_id: crate::ids::ArtifactId,
    pub unit_index: u32,
}

/// One complete user→agent exchange.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: TurnId,
    pub generation: Generation,
    pub user_transcript: String,
    pub assistant_text: String,
    pub interrupted: bool,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub audio_chunks: Vec<AudioChunkRef>,
}

impl Turn {
    pub fn new(generation: Generation, user_transcript: String) -> Self {
        Self {
            id: TurnId::new(),
            generation,
            user_transcript,
            assistant_text: String::new(),
            interrupted: false,
            started_at: chrono::Utc::now(),
            ended_at: None,
            audio_chunks: Vec::new(),
        }
    }
}

/// One per-client-connection session, exclusively owned by the
/// turn controller.
pub struct Session {
    pub id: SessionId,
    pub agent: Option<AgentConfig>,
    pub audio_config: Option<AudioConfig>,
    pub history: Vec<HistoryEntry>,
    pub current_turn: Option<Turn>,
    /// Caller metadata learned from the `call_started` frame, if any.
    pub caller_id: Option<String>,
    generation: GenerationCounter,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            agent: None,
            audio_config: None,
            history: Vec::new(),
            current_turn: None,
            caller_id: None,
            generation: GenerationCounter::new(),
        }
    }

    pub fn current_generation(&self) -> Generation {
        self.generation.current()
    }

    /// Increment the generation on barge-in or explicit interrupt.
    pub fn advance_generation(&mut self) -> Generation {
        self.generation.advance()
    }

    /// Append a history entry, panicking on a same-role-as-predecessor
    /// violation — this would be a turn-controller bug, not recoverable
    /// input. History must alternate roles strictly.
    pub fn push_history(&mut self, role: Role, content: String, turn_id: TurnId) {
        if let Some(last) = self.history.last() {
            assert_ne!(last.role, role, "dialog history must alternate roles");
        }
        self.history.push(HistoryEntry { role, content, turn_id });
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
