//! Turn controller (C4) — the state machine, the sole mutator
//! of session state. Grounded in `voice::orchestrator`'s role as
//! the central coordinator dispatching to STT/LLM/TTS services, but
//! rebuilt around an explicit state machine, replacing the
//! orchestrator's flag-driven dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use crate::agent::AgentConfig;
use crate::cache::ArtifactCache;
use crate::cancel::CancelToken;
use crate::chunker::{Chunker, SynthesisUnit};
use crate::config::ServerConfig;
use crate::egress::Egress;
use crate::error::DialogError;
use crate::ids::Generation;
use crate::llm::{DialogMessage, LlmProvider, Role as LlmRole};
use crate::protocol::ServerMessage;
use crate::session::{Role as HistoryRole, Session, Turn};
use crate::tts::{Synthesized, TextToSpeech, TtsError, VoiceSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Listening,
    Generating,
    SpeakingTail,
}

/// Events fed into the controller by C2 (VAD), C3 (STT), and the protocol
/// layer. One controller instance per session; all events for a session
/// flow through a single bounded channel, giving single-mutator
/// ownership of session state.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    SpeechStart,
    SpeechEnd,
    /// Tagged with the generation the STT session was opened at, so a
    /// hypothesis from a barged-out utterance can be told apart from one
    /// belonging to the current turn.
    InterimTranscript(String, Generation),
    FinalTranscript(String, Generation),
    SttFailed(Generation),
    ClientInterrupt,
    /// A text-only `message` control frame, bypassing STT.
    TextMessage(String),
    AudioPlaybackComplete,
    AgentSelected(AgentConfig),
    /// Caller metadata from the `call_started` frame, if any.
    CallStarted(Option<String>),
    /// A malformed or unexpected control frame. Fatal: the controller
    /// emits an `error` marker and the session closes.
    ProtocolError(String),
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Whether a mid-generation event was a barge-in trigger.
enum BargeInSource {
    Vad,
    Client,
}

pub struct TurnController {
    pub state: TurnState,
    session: Session,
    egress: Egress,
    cache: Arc<ArtifactCache>,
    llm: Arc<dyn LlmProvider>,
    tts: Arc<dyn TextToSpeech>,
    config: ServerConfig,
}

impl TurnController {
    pub fn new(
        session: Session,
        egress: Egress,
        cache: Arc<ArtifactCache>,
        llm: Arc<dyn LlmProvider>,
        tts: Arc<dyn TextToSpeech>,
        config: ServerConfig,
    ) -> Self {
        Self { state: TurnState::Idle, session, egress, cache, llm, tts, config }
    }

    pub fn session_id(&self) -> crate::ids::SessionId {
        self.session.id
    }

    /// Drain `events` for the lifetime of the session. The one place
    /// `run_generation` yields back to this loop is at its own suspension
    /// points, via the `tokio::select!` inside it — so a barge-in mid
    /// generation is observed within one select iteration, not after the
    /// whole generation completes.
    ///
    /// Each iteration is itself bounded by `timeouts.idle_session`: a
    /// session with no inbound event at all for that long is closed
    /// rather than held open indefinitely.
    pub async fn run(mut self, mut events: mpsc::Receiver<ControllerEvent>) {
        loop {
            match tokio::time::timeout(self.config.timeouts.idle_session, events.recv()).await {
                Ok(Some(event)) => {
                    if self.handle(event, &mut events).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    tracing::info!(session = %self.session.id, "idle session timeout, closing");
                    let generation = self.session.current_generation();
                    self.emit_error(generation, DialogError::Timeout("idle_session")).await;
                    break;
                }
            }
        }
        self.cache.drop_session(self.session.id);
    }

    /// Emit the greeting sequence for a newly selected agent (S1).
    async fn emit_greeting(&mut self) {
        let Some(agent) = self.session.agent.clone() else { return };
        let generation = self.session.current_generation();
        self.egress
            .send(generation, ServerMessage::AgentGreeting { text: agent.initial_greeting.clone(), timestamp: now_secs() })
            .await;

        let voice = VoiceSettings { voice_id: agent.voice_id.clone(), speaking_speed: agent.speaking_speed };
        match self.tts.synthesize(&agent.initial_greeting, &voice).await {
            Ok(synth) => {
                let id = self.cache.put(self.session.id, synth.audio_bytes, synth.content_type);
                self.egress
                    .send(
                        generation,
                        ServerMessage::GreetingAudio {
                            audio_url: format!("/audio/{id}"),
                            text: agent.initial_greeting.clone(),
                            timestamp: now_secs(),
                        },
                    )
                    .await;
            }
            Err(err) => {
                tracing::warn!(session = %self.session.id, error = %err, "greeting synthesis failed");
            }
        }
    }

    /// Handle one event, returning `true` if the session should close.
    async fn handle(&mut self, event: ControllerEvent, events: &mut mpsc::Receiver<ControllerEvent>) -> bool {
        match (self.state, event) {
            (_, ControllerEvent::ProtocolError(message)) => {
                let generation = self.session.current_generation();
                self.emit_error(generation, DialogError::Protocol(message)).await;
                return true;
            }

            (_, ControllerEvent::AgentSelected(agent)) => {
                self.session.agent = Some(agent);
                self.emit_greeting().await;
            }

            (_, ControllerEvent::CallStarted(caller_id)) => {
                self.session.caller_id = caller_id;
            }

            (TurnState::Idle, ControllerEvent::SpeechStart) => {
                self.state = TurnState::Listening;
                self.egress.send(self.session.current_generation(), ServerMessage::SpeechStart { timestamp: now_secs() }).await;
            }

            (TurnState::Listening, ControllerEvent::InterimTranscript(text, generation)) => {
                if generation < self.session.current_generation() {
                    tracing::debug!(session = %self.session.id, "discarding interim transcript from a stale generation");
                } else {
                    self.egress.send(self.session.current_generation(), ServerMessage::InterimTranscript { text, timestamp: now_secs() }).await;
                }
            }

            (TurnState::Listening, ControllerEvent::FinalTranscript(text, generation)) => {
                if generation < self.session.current_generation() {
                    tracing::debug!(session = %self.session.id, "discarding final transcript from a stale generation");
                } else {
                    self.egress.send(self.session.current_generation(), ServerMessage::SpeechEnd { timestamp: now_secs() }).await;
                    self.start_turn_from_transcript(text, events).await;
                }
            }

            (TurnState::Listening, ControllerEvent::SpeechEnd) => {
                // speech_end without a final transcript: discard, no history change.
                self.state = TurnState::Idle;
            }

            (TurnState::Listening, ControllerEvent::SttFailed(generation)) => {
                if generation < self.session.current_generation() {
                    tracing::debug!(session = %self.session.id, "discarding stt failure from a stale generation");
                } else {
                    let current = self.session.current_generation();
                    self.emit_error(current, DialogError::ProviderTransient { provider: "stt", message: "stt session failed or timed out".into() }).await;
                    self.state = TurnState::Idle;
                }
            }

            (TurnState::Idle, ControllerEvent::TextMessage(text)) | (TurnState::Listening, ControllerEvent::TextMessage(text)) => {
                self.start_turn_from_transcript(text, events).await;
            }

            (_, ControllerEvent::ClientInterrupt) => {
                // Idempotent from IDLE/LISTENING/an-already-superseded generation:
                // only GENERATING/SPEAKING_TAIL have an in-flight generation to cancel, and
                // those are handled by the `select!` inside `run_generation`, not here.
            }

            (TurnState::Generating, ControllerEvent::FinalTranscript(_, _)) => {
                // A late final_transcript while GENERATING is discarded: its
                // generation is necessarily < current, since a new turn can
                // only start from LISTENING; no-op here.
            }

            (_, ControllerEvent::AudioPlaybackComplete) => {
                // Informational; no state change required
            }

            _ => {
                tracing::debug!(session = %self.session.id, state = ?self.state, "event ignored in current state");
            }
        }
        false
    }

    /// Increment generation, cancel nothing here (the generation loop
    /// notices via `events` itself), and announce the cut to the client.
    fn bump_for_barge_in(&mut self, source: &'static str) -> Generation {
        let prior = self.session.current_generation();
        let new_generation = self.session.advance_generation();
        tracing::info!(session = %self.session.id, source, prior = %prior, new = %new_generation, "barge-in");
        self.egress.bump_generation(new_generation);
        new_generation
    }

    async fn start_turn_from_transcript(&mut self, text: String, events: &mut mpsc::Receiver<ControllerEvent>) {
        let generation = self.session.current_generation();
        self.egress.send(generation, ServerMessage::UserTranscript { text: text.clone(), timestamp: now_secs() }).await;

        let turn = Turn::new(generation, text.clone());
        let turn_id = turn.id;
        self.session.current_turn = Some(turn);
        self.session.push_history(HistoryRole::User, text, turn_id);
        self.state = TurnState::Generating;

        self.run_generation(generation, events).await;
    }

    /// C5 -> C6 -> C7 -> C8 pipeline for the turn just started. A
    /// `tokio::select!` races LLM-stream progress against new inbound
    /// events so a barge-in (VAD `speech_start` or client `interrupt`)
    /// is observed immediately rather than after the generation drains,
    /// keeping cancellation latency low.
    async fn run_generation(&mut self, generation: Generation, events: &mut mpsc::Receiver<ControllerEvent>) {
        self.egress.send(generation, ServerMessage::StreamStart { timestamp: now_secs() }).await;

        let Some(agent) = self.session.agent.clone() else {
            tracing::warn!(session = %self.session.id, "no agent selected, cannot generate");
            self.state = TurnState::Idle;
            return;
        };

        let system_prompt = agent.render_system_prompt(self.session.caller_id.as_deref());
        let mut history = vec![DialogMessage { role: LlmRole::System, content: system_prompt }];
        for entry in &self.session.history {
            let role = match entry.role {
                HistoryRole::User => LlmRole::User,
                HistoryRole::Assistant => LlmRole::Assistant,
            };
            history.push(DialogMessage { role, content: entry.content.clone() });
        }

        let cancel = CancelToken::new();
        let started = tokio::time::timeout(self.config.timeouts.llm_start, self.llm.start(&agent.llm_model, history, cancel.clone())).await;
        let mut stream = match started {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                self.emit_error(generation, DialogError::ProviderTransient { provider: "llm", message: err.to_string() }).await;
                self.abandon_turn(generation).await;
                return;
            }
            Err(_elapsed) => {
                self.emit_error(generation, DialogError::Timeout("llm_start")).await;
                self.abandon_turn(generation).await;
                return;
            }
        };

        let mut chunker = Chunker::new(&self.config.chunker);
        let semaphore = Arc::new(Semaphore::new(self.config.tts_concurrency));
        let mut in_flight: tokio::task::JoinSet<(u32, Result<Synthesized, TtsError>)> = tokio::task::JoinSet::new();
        let mut reorder: BTreeMap<u32, (String, Result<Synthesized, TtsError>)> = BTreeMap::new();
        let mut next_to_emit: u32 = 0;
        let mut unit_texts: BTreeMap<u32, String> = BTreeMap::new();
        let mut barged: Option<BargeInSource> = None;

        'drive: loop {
            tokio::select! {
                biased;

                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(ControllerEvent::SpeechStart) => { barged = Some(BargeInSource::Vad); break 'drive; }
                        Some(ControllerEvent::ClientInterrupt) => { barged = Some(BargeInSource::Client); break 'drive; }
                        Some(other) => {
                            tracing::debug!(session = %self.session.id, "deferring event during generation: {other:?}");
                        }
                        None => break 'drive,
                    }
                }

                fragment = stream.next_fragment() => {
                    let Some(fragment) = fragment else { break 'drive; };
                    if let Some(turn) = self.session.current_turn.as_mut() {
                        turn.assistant_text.push_str(&fragment);
                    }
                    let units = chunker.push(&fragment, generation);
                    self.egress.send(generation, ServerMessage::TextChunk { text: fragment, timestamp: now_secs() }).await;
                    for unit in units {
                        self.dispatch_unit(unit, &agent, &semaphore, &mut in_flight, &mut unit_texts).await;
                    }
                }
            }
        }

        if let Some(source) = barged {
            // Cut immediately: bump the generation and stop the client's
            // audio before touching anything still in flight. Bumping
            // first means `egress::run_writer` drops every already-queued
            // pre-barge-in message at the head of the queue instead of
            // delivering it after the cut.
            let source = match source {
                BargeInSource::Vad => "vad",
                BargeInSource::Client => "client",
            };
            let new_generation = self.bump_for_barge_in(source);
            in_flight.abort_all();
            drop(in_flight);
            self.egress.send(new_generation, ServerMessage::StopAudioImmediately { timestamp: now_secs() }).await;
            if let Some(turn) = self.session.current_turn.take() {
                self.finalize_turn(turn, true).await;
            }
            self.state = TurnState::Listening;
            return;
        }

        if let Some(unit) = chunker.flush(generation) {
            self.dispatch_unit(unit, &agent, &semaphore, &mut in_flight, &mut unit_texts).await;
        }

        self.state = TurnState::SpeakingTail;
        while let Some(joined) = in_flight.join_next().await {
            if let Ok((index, result)) = joined {
                let text = unit_texts.remove(&index).unwrap_or_default();
                reorder.insert(index, (text, result));
                while let Some((text, result)) = reorder.remove(&next_to_emit) {
                    self.emit_audio_result(generation, next_to_emit, text, result).await;
                    next_to_emit += 1;
                }
            }
        }

        if let Some(failure) = stream.partial_failure() {
            tracing::warn!(session = %self.session.id, error = %failure, "llm partial failure, using fragments received so far");
        }

        let emitted_text = self.session.current_turn.as_ref().map(|t| t.assistant_text.clone()).unwrap_or_default();

        if emitted_text.is_empty() {
            // Empty LLM text: stream_complete with an empty body, no history append.
            self.egress.send(generation, ServerMessage::StreamComplete { full_text: String::new(), interrupted: false, timestamp: now_secs() }).await;
            self.session.current_turn = None;
            self.state = TurnState::Idle;
            return;
        }

        self.egress.send(generation, ServerMessage::StreamComplete { full_text: emitted_text, interrupted: false, timestamp: now_secs() }).await;
        if let Some(turn) = self.session.current_turn.take() {
            self.finalize_turn(turn, false).await;
        }
        self.state = TurnState::Idle;
    }

    async fn dispatch_unit(
        &mut self,
        unit: SynthesisUnit,
        agent: &AgentConfig,
        semaphore: &Arc<Semaphore>,
        in_flight: &mut tokio::task::JoinSet<(u32, Result<Synthesized, TtsError>)>,
        unit_texts: &mut BTreeMap<u32, String>,
    ) {
        unit_texts.insert(unit.index, unit.text.clone());
        let tts = self.tts.clone();
        let voice = VoiceSettings { voice_id: agent.voice_id.clone(), speaking_speed: agent.speaking_speed };
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
        let index = unit.index;
        let text = unit.text;
        let unit_timeout = self.config.timeouts.tts_unit;
        in_flight.spawn(async move {
            let _permit = permit;
            let result = match tokio::time::timeout(unit_timeout, tts.synthesize(&text, &voice)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(TtsError::Timeout),
            };
            (index, result)
        });
    }

    async fn emit_audio_result(&mut self, generation: Generation, index: u32, text: String, result: Result<Synthesized, TtsError>) {
        match result {
            Ok(synth) => {
                let id = self.cache.put(self.session.id, synth.audio_bytes, synth.content_type);
                if let Some(turn) = self.session.current_turn.as_mut() {
                    turn.audio_chunks.push(crate::session::AudioChunkRef { artifact_id: id, unit_index: index });
                }
                self.egress.send(generation, ServerMessage::AudioChunk { audio_url: format!("/audio/{id}"), text, timestamp: now_secs() }).await;
            }
            Err(err) => {
                // Skip the audio_chunk for this unit; the text_chunk for it
                // was already sent. Non-fatal: still warn the client so it
                // doesn't wait forever on audio that will never arrive.
                tracing::warn!(session = %self.session.id, unit = index, error = %err, "tts synthesis failed for unit");
                self.emit_error(generation, DialogError::ProviderTransient { provider: "tts", message: err.to_string() }).await;
            }
        }
    }

    async fn emit_error(&mut self, generation: Generation, error: DialogError) {
        self.egress.send(generation, ServerMessage::Error { kind: error.kind().to_string(), message: error.to_string(), timestamp: now_secs() }).await;
    }

    async fn abandon_turn(&mut self, generation: Generation) {
        self.session.current_turn = None;
        self.state = TurnState::Idle;
        self.egress.send(generation, ServerMessage::StreamComplete { full_text: String::new(), interrupted: false, timestamp: now_secs() }).await;
    }

    /// Close out a turn: append its assistant content to history (full or
    /// truncated-at-barge-in) unless nothing was ever emitted.
    async fn finalize_turn(&mut self, mut turn: Turn, interrupted: bool) {
        turn.interrupted = interrupted;
        turn.ended_at = Some(chrono::Utc::now());
        if !turn.assistant_text.is_empty() {
            self.session.push_history(HistoryRole::Assistant, turn.assistant_text.clone(), turn.id);
        }
    }
}
