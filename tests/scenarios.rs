//! End-to-end scenario tests, driving `TurnController`
//! directly through its event/egress channels the way `streaming-core`'s
//! own `tests/*.rs` exercise the pipeline core without a live transport.
//! Providers are the test doubles in `llm`, `tts::silence`, built here only
//! where a scenario needs timing control a `Scripted*` double doesn't give.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};

use dialog_core::agent::AgentConfig;
use dialog_core::cache::ArtifactCache;
use dialog_core::cancel::CancelToken;
use dialog_core::config::{CacheConfig, ServerConfig};
use dialog_core::egress::{run_writer, Egress};
use dialog_core::ids::Generation;
use dialog_core::llm::{DialogMessage, LlmError, LlmProvider, LlmStream, ScriptedLlm};
use dialog_core::protocol::{ServerMessage, Tagged};
use dialog_core::session::Session;
use dialog_core::tts::silence::SilenceTts;
use dialog_core::tts::{Synthesized, TextToSpeech, TtsError, VoiceSettings};
use dialog_core::turn_controller::{ControllerEvent, TurnController};

/// Captures every message the writer task would have sent to the client, in
/// order, generation-filtering included — same pattern as
/// `egress::run_writer`'s own unit tests.
fn spawn_collector(
    rx: mpsc::Receiver<Tagged<ServerMessage>>,
    gen_rx: watch::Receiver<Generation>,
) -> (tokio::task::JoinHandle<()>, Arc<Mutex<Vec<ServerMessage>>>) {
    let out = Arc::new(Mutex::new(Vec::new()));
    let out2 = out.clone();
    let handle = tokio::spawn(async move {
        run_writer(rx, gen_rx, move |msg| {
            let out2 = out2.clone();
            async move {
                out2.lock().await.push(msg);
            }
        })
        .await;
    });
    (handle, out)
}

fn test_config() -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".into(),
        tts_concurrency: 3,
        cache: CacheConfig { ttl: Duration::from_secs(300), max_total_bytes: 64 * 1024 * 1024 },
        ..ServerConfig::default()
    }
}

fn harness(
    llm: Arc<dyn LlmProvider>,
) -> (mpsc::Sender<ControllerEvent>, Arc<ArtifactCache>, tokio::task::JoinHandle<()>, Arc<Mutex<Vec<ServerMessage>>>) {
    harness_with_tts(llm, Arc::new(SilenceTts::new()))
}

fn harness_with_tts(
    llm: Arc<dyn LlmProvider>,
    tts: Arc<dyn TextToSpeech>,
) -> (mpsc::Sender<ControllerEvent>, Arc<ArtifactCache>, tokio::task::JoinHandle<()>, Arc<Mutex<Vec<ServerMessage>>>) {
    let cache = Arc::new(ArtifactCache::new(&test_config().cache));
    let (egress, egress_rx, gen_rx) = Egress::channel(256);
    let (events_tx, events_rx) = mpsc::channel(64);
    let session = Session::new();

    let controller = TurnController::new(session, egress, cache.clone(), llm, tts, test_config());
    let controller_task = tokio::spawn(controller.run(events_rx));
    let (collector_task, out) = spawn_collector(egress_rx, gen_rx);

    // Both background tasks end once `events_tx` is dropped: the controller
    // loop exits, drops its owned `Egress`, and the collector's channel closes.
    let joined = tokio::spawn(async move {
        let _ = controller_task.await;
        let _ = collector_task.await;
    });
    (events_tx, cache, joined, out)
}

async fn finish(events_tx: mpsc::Sender<ControllerEvent>, joined: tokio::task::JoinHandle<()>) {
    drop(events_tx);
    joined.await.unwrap();
}

fn a1() -> AgentConfig {
    let mut agent = AgentConfig::stub("a1");
    agent.initial_greeting = "Hello!".to_string();
    agent
}

#[tokio::test]
async fn s1_greeting_only() {
    let llm = Arc::new(ScriptedLlm { fragments: vec![] });
    let (events_tx, cache, joined, out) = harness(llm);

    events_tx.send(ControllerEvent::AgentSelected(a1())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    finish(events_tx, joined).await;

    let out = out.lock().await;
    assert!(matches!(&out[0], ServerMessage::AgentGreeting { text, .. } if text == "Hello!"));
    let audio_url = match &out[1] {
        ServerMessage::GreetingAudio { audio_url, text, .. } => {
            assert_eq!(text, "Hello!");
            audio_url.clone()
        }
        other => panic!("expected greeting_audio, got {other:?}"),
    };

    let id = audio_url.trim_start_matches("/audio/").parse().unwrap();
    assert!(cache.get(id).is_some(), "greeting artifact must be fetchable via its audio_url");
}

#[tokio::test]
async fn s2_clean_turn() {
    let llm = Arc::new(ScriptedLlm { fragments: vec!["It is three".into(), " in the afternoon.".into()] });
    let (events_tx, _cache, joined, out) = harness(llm);

    events_tx.send(ControllerEvent::AgentSelected(a1())).await.unwrap();
    events_tx.send(ControllerEvent::SpeechStart).await.unwrap();
    events_tx.send(ControllerEvent::InterimTranscript("what".into(), Generation(0))).await.unwrap();
    events_tx.send(ControllerEvent::InterimTranscript("what time is it".into(), Generation(0))).await.unwrap();
    events_tx.send(ControllerEvent::FinalTranscript("What time is it?".into(), Generation(0))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    finish(events_tx, joined).await;

    let out = out.lock().await;
    let kinds: Vec<&str> = out
        .iter()
        .map(|m| match m {
            ServerMessage::AgentGreeting { .. } => "agent_greeting",
            ServerMessage::GreetingAudio { .. } => "greeting_audio",
            ServerMessage::SpeechStart { .. } => "speech_start",
            ServerMessage::InterimTranscript { .. } => "interim_transcript",
            ServerMessage::SpeechEnd { .. } => "speech_end",
            ServerMessage::UserTranscript { .. } => "user_transcript",
            ServerMessage::StreamStart { .. } => "stream_start",
            ServerMessage::TextChunk { .. } => "text_chunk",
            ServerMessage::AudioChunk { .. } => "audio_chunk",
            ServerMessage::StreamComplete { .. } => "stream_complete",
            ServerMessage::StopAudioImmediately { .. } => "stop_audio_immediately",
            ServerMessage::Error { .. } => "error",
        })
        .collect();

    assert_eq!(
        kinds,
        vec![
            "agent_greeting",
            "greeting_audio",
            "speech_start",
            "interim_transcript",
            "interim_transcript",
            "speech_end",
            "user_transcript",
            "stream_start",
            "text_chunk",
            "text_chunk",
            "audio_chunk",
            "stream_complete",
        ]
    );

    match out.last().unwrap() {
        ServerMessage::StreamComplete { full_text, interrupted, .. } => {
            assert_eq!(full_text, "It is three in the afternoon.");
            assert!(!interrupted);
        }
        other => panic!("expected stream_complete, got {other:?}"),
    }
}

/// Fragments arrive only after a delay, so a concurrently-sent event has a
/// window to interleave — exercises the `tokio::select!` race in
/// `run_generation` the same way a live provider's network latency would.
struct SlowLlm {
    fragments: Vec<String>,
    delay: Duration,
}

struct SlowLlmStream {
    remaining: VecDeque<String>,
    delay: Duration,
    cancel: CancelToken,
}

#[async_trait]
impl LlmStream for SlowLlmStream {
    async fn next_fragment(&mut self) -> Option<String> {
        tokio::time::sleep(self.delay).await;
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
impl LlmProvider for SlowLlm {
    async fn start(&self, _model: &str, _history: Vec<DialogMessage>, cancel: CancelToken) -> Result<Box<dyn LlmStream>, LlmError> {
        Ok(Box::new(SlowLlmStream { remaining: self.fragments.clone().into(), delay: self.delay, cancel }))
    }
}

#[tokio::test]
async fn s3_barge_in_stops_prior_generation_and_starts_a_new_turn() {
    let llm = Arc::new(SlowLlm { fragments: vec!["It is".into(), " three.".into()], delay: Duration::from_millis(80) });
    let (events_tx, _cache, joined, out) = harness(llm);

    events_tx.send(ControllerEvent::AgentSelected(a1())).await.unwrap();
    events_tx.send(ControllerEvent::FinalTranscript("What time is it?".into(), Generation(0))).await.unwrap();
    // Fires while the first fragment is still sleeping.
    tokio::time::sleep(Duration::from_millis(20)).await;
    events_tx.send(ControllerEvent::SpeechStart).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    finish(events_tx, joined).await;

    let out = out.lock().await;
    assert!(
        out.iter().any(|m| matches!(m, ServerMessage::StopAudioImmediately { .. })),
        "barge-in must emit stop_audio_immediately: {out:?}"
    );
    assert!(
        !out.iter().any(|m| matches!(m, ServerMessage::StreamComplete { interrupted: false, .. })),
        "no non-interrupted stream_complete should reach the client for the superseded generation: {out:?}"
    );
    // The second speech_start (the barge-in itself) reaches the client too.
    assert_eq!(out.iter().filter(|m| matches!(m, ServerMessage::SpeechStart { .. })).count(), 1);
}

/// Synthesizes slowly enough that a unit dispatched from the first LLM
/// fragment is still in flight when the barge-in event fires.
struct SlowTts {
    delay: Duration,
}

#[async_trait]
impl TextToSpeech for SlowTts {
    async fn synthesize(&self, _text: &str, _voice: &VoiceSettings) -> Result<Synthesized, TtsError> {
        tokio::time::sleep(self.delay).await;
        Ok(Synthesized { audio_bytes: vec![0u8; 4], content_type: "audio/wav" })
    }
}

/// First fragment completes a sentence immediately (dispatching a TTS unit),
/// the second sleeps past the barge-in so the `select!` in `run_generation`
/// actually observes the interrupt mid-generation rather than after the
/// stream drains.
struct DispatchThenStallLlm {
    stall: Duration,
}

struct DispatchThenStallStream {
    first: Option<String>,
    stall: Duration,
    cancel: CancelToken,
}

#[async_trait]
impl LlmStream for DispatchThenStallStream {
    async fn next_fragment(&mut self) -> Option<String> {
        if let Some(text) = self.first.take() {
            return Some(text);
        }
        tokio::time::sleep(self.stall).await;
        if self.cancel.is_cancelled() {
            return None;
        }
        None
    }

    fn partial_failure(&self) -> Option<&LlmError> {
        None
    }
}

#[async_trait]
impl LlmProvider for DispatchThenStallLlm {
    async fn start(&self, _model: &str, _history: Vec<DialogMessage>, cancel: CancelToken) -> Result<Box<dyn LlmStream>, LlmError> {
        Ok(Box::new(DispatchThenStallStream { first: Some("Done unit one. ".into()), stall: self.stall, cancel }))
    }
}

#[tokio::test]
async fn s3b_barge_in_with_tts_in_flight_drops_stale_audio() {
    let llm = Arc::new(DispatchThenStallLlm { stall: Duration::from_millis(200) });
    let tts = Arc::new(SlowTts { delay: Duration::from_millis(100) });
    let (events_tx, _cache, joined, out) = harness_with_tts(llm, tts);

    events_tx.send(ControllerEvent::AgentSelected(a1())).await.unwrap();
    events_tx.send(ControllerEvent::FinalTranscript("What time is it?".into(), Generation(0))).await.unwrap();
    // By now the first fragment dispatched a TTS unit that takes 100ms; fire
    // the barge-in well before it would have completed.
    tokio::time::sleep(Duration::from_millis(30)).await;
    events_tx.send(ControllerEvent::SpeechStart).await.unwrap();
    // Long enough for the in-flight TTS unit to finish if it were (wrongly)
    // awaited before the cut, but the assertions below require it never be
    // delivered regardless of how long we wait.
    tokio::time::sleep(Duration::from_millis(200)).await;
    finish(events_tx, joined).await;

    let out = out.lock().await;
    assert!(
        !out.iter().any(|m| matches!(m, ServerMessage::AudioChunk { .. })),
        "a TTS unit dispatched before the barge-in must never reach the client as audio_chunk: {out:?}"
    );
    assert!(
        out.iter().any(|m| matches!(m, ServerMessage::StopAudioImmediately { .. })),
        "barge-in must still emit stop_audio_immediately: {out:?}"
    );
}

/// Yields a fixed run of fragments, then ends with a provider failure
/// ( "on provider error mid-stream, emits the fragments received
/// so far and reports `llm_partial_failure`; C4 treats this like a normal
/// completion").
struct FlakyLlmStream {
    remaining: VecDeque<String>,
    failure: Option<LlmError>,
}

#[async_trait]
impl LlmStream for FlakyLlmStream {
    async fn next_fragment(&mut self) -> Option<String> {
        if let Some(fragment) = self.remaining.pop_front() {
            return Some(fragment);
        }
        if self.failure.is_none() {
            self.failure = Some(LlmError::Provider("connection reset".into()));
        }
        None
    }

    fn partial_failure(&self) -> Option<&LlmError> {
        self.failure.as_ref()
    }
}

struct FlakyLlm {
    fragments: Vec<String>,
}

#[async_trait]
impl LlmProvider for FlakyLlm {
    async fn start(&self, _model: &str, _history: Vec<DialogMessage>, _cancel: CancelToken) -> Result<Box<dyn LlmStream>, LlmError> {
        Ok(Box::new(FlakyLlmStream { remaining: self.fragments.clone().into(), failure: None }))
    }
}

#[tokio::test]
async fn s4_llm_mid_stream_failure_still_completes_with_partial_text() {
    let llm = Arc::new(FlakyLlm { fragments: vec!["One.".into(), " Two.".into(), " Three.".into()] });
    let (events_tx, _cache, joined, out) = harness(llm);

    events_tx.send(ControllerEvent::AgentSelected(a1())).await.unwrap();
    events_tx.send(ControllerEvent::FinalTranscript("Count to three.".into(), Generation(0))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    finish(events_tx, joined).await;

    let out = out.lock().await;
    let text_chunks = out.iter().filter(|m| matches!(m, ServerMessage::TextChunk { .. })).count();
    assert_eq!(text_chunks, 3);

    match out.last().unwrap() {
        ServerMessage::StreamComplete { full_text, interrupted, .. } => {
            assert_eq!(full_text, "One. Two. Three.");
            assert!(!interrupted);
        }
        other => panic!("expected stream_complete, got {other:?}"),
    }
}

#[tokio::test]
async fn s5_speech_end_without_final_transcript_is_a_silent_no_op() {
    let llm = Arc::new(ScriptedLlm { fragments: vec![] });
    let (events_tx, _cache, joined, out) = harness(llm);

    events_tx.send(ControllerEvent::AgentSelected(a1())).await.unwrap();
    events_tx.send(ControllerEvent::SpeechStart).await.unwrap();
    events_tx.send(ControllerEvent::SpeechEnd).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    finish(events_tx, joined).await;

    let out = out.lock().await;
    assert!(
        out.iter().all(|m| matches!(m, ServerMessage::AgentGreeting { .. } | ServerMessage::GreetingAudio { .. } | ServerMessage::SpeechStart { .. })),
        "no turn-related messages should follow an empty utterance: {out:?}"
    );
    assert!(!out.iter().any(|m| matches!(m, ServerMessage::UserTranscript { .. } | ServerMessage::StreamStart { .. })));
}

#[tokio::test]
async fn s6_artifact_expires_after_ttl_but_session_is_unaffected() {
    let cache = Arc::new(ArtifactCache::new(&CacheConfig { ttl: Duration::from_millis(30), max_total_bytes: 1024 * 1024 }));
    let (egress, egress_rx, gen_rx) = Egress::channel(64);
    let (events_tx, events_rx) = mpsc::channel(64);
    let session = Session::new();

    let llm = Arc::new(ScriptedLlm { fragments: vec![] });
    let controller = TurnController::new(session, egress, cache.clone(), llm, Arc::new(SilenceTts::new()), test_config());
    let controller_task = tokio::spawn(controller.run(events_rx));
    let (collector_task, out) = spawn_collector(egress_rx, gen_rx);

    events_tx.send(ControllerEvent::AgentSelected(a1())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let audio_url = match &out.lock().await[1] {
        ServerMessage::GreetingAudio { audio_url, .. } => audio_url.clone(),
        other => panic!("expected greeting_audio, got {other:?}"),
    };
    let id = audio_url.trim_start_matches("/audio/").parse().unwrap();
    assert!(cache.get(id).is_some());

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(cache.get(id).is_none(), "artifact must be gone once its TTL has elapsed");

    // The session itself is unaffected: a later turn still proceeds normally.
    events_tx.send(ControllerEvent::TextMessage("still there?".into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(events_tx);
    controller_task.await.unwrap();
    collector_task.await.unwrap();

    let out = out.lock().await;
    assert!(out.iter().any(|m| matches!(m, ServerMessage::StreamComplete { .. })));
}
