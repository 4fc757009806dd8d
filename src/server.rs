//! Server wiring: the axum router exposing the duplex session endpoint
//! (C1's transport) and the artifact GET endpoint. The split
//! between binary PCM frames and textual control frames mirrors
//! `ws_audio::WsMessage::{Audio, Json}` in `streaming-core`'s ingress;
//! `axum` replaces raw `tokio-tungstenite` here so one router can serve
//! both the WS upgrade and the artifact GET (see DESIGN.md).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::agent::AgentStore;
use crate::cache::ArtifactCache;
use crate::config::ServerConfig;
use crate::egress::{run_writer, Egress};
use crate::ids::{ArtifactId, Generation};
use crate::llm::LlmProvider;
use crate::protocol::{AudioConfig, ClientMessage};
use crate::session::Session;
use crate::stt::{SpeechToText, TranscriptEvent};
use crate::tts::TextToSpeech;
use crate::turn_controller::{ControllerEvent, TurnController};
use crate::vad::earshot_vad::EarshotVad;
use crate::vad::edge::{EdgeDetector, VadEvent};
use crate::vad::{VoiceActivityDetector, FRAME_SAMPLES};

/// Shared process-wide state injected into every handler.
pub struct AppState {
    pub config: ServerConfig,
    pub cache: Arc<ArtifactCache>,
    pub agents: Arc<dyn AgentStore>,
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LlmProvider>,
    pub tts: Arc<dyn TextToSpeech>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/session", get(ws_handler))
        .route("/audio/:id", get(artifact_handler))
        .with_state(state)
}

async fn artifact_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    let Ok(id) = id.parse::<ArtifactId>() else {
        return (StatusCode::NOT_FOUND, "unknown artifact id").into_response();
    };
    match state.cache.get(id) {
        Some((bytes, content_type)) => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        None => (StatusCode::NOT_FOUND, "artifact expired or unknown").into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

/// Per-connection state the read loop owns: the VAD edge detector, the
/// currently-open STT session (if any), and the raw audio_config
/// handshake once validated.
struct SessionIngest {
    edge: EdgeDetector,
    vad: EarshotVad,
    stt_session: Option<Box<dyn crate::stt::SttSession>>,
    audio_config: Option<AudioConfig>,
    /// Mirrors the controller's generation counter via the same watch
    /// channel `egress` uses for outbound staleness, so new STT sessions
    /// (and the events they produce) are tagged with the generation
    /// actually current at open time rather than a frozen `Generation(0)`.
    gen_rx: tokio::sync::watch::Receiver<Generation>,
    /// Set once a fatal protocol error has been reported to the controller;
    /// the read loop closes the connection on the next iteration.
    fatal: bool,
}

impl SessionIngest {
    fn current_generation(&self) -> Generation {
        *self.gen_rx.borrow()
    }
}

async fn handle_session(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    let (events_tx, events_rx) = mpsc::channel::<ControllerEvent>(64);
    let (egress, egress_rx, gen_rx) = Egress::channel(256);
    let ingest_gen_rx = gen_rx.clone();

    let session = Session::new();
    let session_id = session.id;
    let controller = TurnController::new(
        session,
        egress,
        state.cache.clone(),
        state.llm.clone(),
        state.tts.clone(),
        state.config.clone(),
    );
    let controller_task = tokio::spawn(controller.run(events_rx));

    let writer_task = tokio::spawn(async move {
        run_writer(egress_rx, gen_rx, move |message| {
            let mut sink = &mut sink;
            async move {
                if let Ok(text) = serde_json::to_string(&message) {
                    let _ = sink.send(Message::Text(text)).await;
                }
            }
        })
        .await;
    });

    let mut ingest = SessionIngest {
        edge: EdgeDetector::new(&state.config.vad),
        vad: EarshotVad::new(state.config.vad.aggressiveness),
        stt_session: None,
        audio_config: None,
        gen_rx: ingest_gen_rx,
        fatal: false,
    };

    loop {
        // While an STT session is open, bound the wait for the next frame
        // by `stt_inactivity`: a client that stops sending audio
        // mid-utterance should not hold the session open forever.
        let next = if ingest.stt_session.is_some() {
            match tokio::time::timeout(state.config.timeouts.stt_inactivity, stream.next()).await {
                Ok(next) => next,
                Err(_elapsed) => {
                    tracing::warn!(%session_id, "stt inactivity timeout, closing stt session");
                    if let Some(mut session) = ingest.stt_session.take() {
                        session.close().await;
                    }
                    let _ = events_tx.send(ControllerEvent::SttFailed(ingest.current_generation())).await;
                    continue;
                }
            }
        } else {
            stream.next().await
        };

        let Some(Ok(msg)) = next else { break };
        match msg {
            Message::Text(text) => {
                handle_control_frame(&text, &mut ingest, &events_tx, &state, session_id).await;
                if ingest.fatal {
                    break;
                }
            }
            Message::Binary(bytes) => {
                handle_pcm(&bytes, &mut ingest, &events_tx, &state).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    drop(events_tx);
    let _ = controller_task.await; // drops the controller's Session, closing egress
    let _ = writer_task.await;
}

async fn handle_control_frame(
    text: &str,
    ingest: &mut SessionIngest,
    events_tx: &mpsc::Sender<ControllerEvent>,
    state: &Arc<AppState>,
    session_id: crate::ids::SessionId,
) {
    let parsed = match ClientMessage::parse(text) {
        Ok(Some(msg)) => msg,
        Ok(None) => {
            tracing::warn!(%session_id, "unknown control frame discriminator");
            return;
        }
        Err(err) => {
            tracing::warn!(%session_id, error = %err, "malformed control frame");
            return;
        }
    };

    match parsed {
        ClientMessage::AudioConfig(config) => {
            if !config.is_valid() {
                tracing::error!(%session_id, ?config, "rejected audio_config handshake");
                let _ = events_tx
                    .send(ControllerEvent::ProtocolError(format!(
                        "unsupported audio_config: sample_rate={}, encoding={}, channels={}",
                        config.sample_rate, config.encoding, config.channels
                    )))
                    .await;
                ingest.fatal = true;
                return;
            }
            ingest.audio_config = Some(config);
        }
        ClientMessage::AgentConfig { agent_id } => {
            if let Some(agent) = state.agents.get(&agent_id).await {
                let _ = events_tx.send(ControllerEvent::AgentSelected(agent)).await;
            } else {
                tracing::warn!(%session_id, agent_id, "unknown agent id");
            }
        }
        ClientMessage::Message { content, .. } => {
            let _ = events_tx.send(ControllerEvent::TextMessage(content)).await;
        }
        ClientMessage::Interrupt => {
            let _ = events_tx.send(ControllerEvent::ClientInterrupt).await;
        }
        ClientMessage::CallStarted { caller_id } => {
            let _ = events_tx.send(ControllerEvent::CallStarted(caller_id)).await;
        }
        ClientMessage::AudioPlaybackComplete => {
            let _ = events_tx.send(ControllerEvent::AudioPlaybackComplete).await;
        }
    }
}

async fn handle_pcm(bytes: &[u8], ingest: &mut SessionIngest, events_tx: &mpsc::Sender<ControllerEvent>, state: &Arc<AppState>) {
    if ingest.audio_config.is_none() {
        tracing::warn!("pcm frame received before audio_config handshake, dropping");
        return;
    }

    for chunk in bytes.chunks(FRAME_SAMPLES * 2) {
        if chunk.len() != FRAME_SAMPLES * 2 {
            continue; // partial trailing frame, wait for more bytes next message
        }
        let mut frame = [0i16; FRAME_SAMPLES];
        for (i, pair) in chunk.chunks_exact(2).enumerate() {
            frame[i] = i16::from_le_bytes([pair[0], pair[1]]);
        }

        let is_speech = match ingest.vad.is_speech(&frame) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "vad classification failed, treating frame as silence");
                false
            }
        };

        match ingest.edge.push(frame, is_speech) {
            VadEvent::SpeechStart { replay } => {
                let _ = events_tx.send(ControllerEvent::SpeechStart).await;
                let generation = ingest.current_generation();
                let (mut session, rx) = state.stt.open_session(generation).await;
                spawn_transcript_forwarder(rx, events_tx.clone());
                for replayed in replay {
                    session.push_frame(generation, &replayed).await;
                }
                session.push_frame(generation, &frame).await;
                ingest.stt_session = Some(session);
            }
            VadEvent::Frame(frame) => {
                if let Some(session) = ingest.stt_session.as_mut() {
                    session.push_frame(ingest.current_generation(), &frame).await;
                }
            }
            VadEvent::SpeechEnd => {
                if let Some(mut session) = ingest.stt_session.take() {
                    session.close().await;
                }
                let _ = events_tx.send(ControllerEvent::SpeechEnd).await;
            }
            VadEvent::Buffered => {}
        }
    }
}

fn spawn_transcript_forwarder(mut rx: mpsc::Receiver<TranscriptEvent>, events_tx: mpsc::Sender<ControllerEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let forwarded = match event {
                TranscriptEvent::Interim { text, generation } => ControllerEvent::InterimTranscript(text, generation),
                TranscriptEvent::Final { text, generation } => ControllerEvent::FinalTranscript(text, generation),
                TranscriptEvent::Failed { generation, .. } => ControllerEvent::SttFailed(generation),
            };
            if events_tx.send(forwarded).await.is_err() {
                break;
            }
        }
    });
}
