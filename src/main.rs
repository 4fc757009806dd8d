//! Binary entry point: initializes logging, builds the shared process
//! state, and serves the axum router. Logging setup is
//! grounded in `examples/64bit-async-openai/examples/function-call/src/main.rs`'s
//! `tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter...)`
//! composition; `streaming-core::main` itself initializes a bare
//! `FmtSubscriber` with no env-driven level, which this crate upgrades
//! to `RUST_LOG`-configurable logging.

use std::sync::Arc;

use dialog_core::agent::{AgentConfig, AgentStore, InMemoryAgentStore};
use dialog_core::cache::ArtifactCache;
use dialog_core::config::ServerConfig;
use dialog_core::llm::openai::OpenAiLlm;
use dialog_core::server::{router, AppState};
use dialog_core::stt::mock::MockStt;
use dialog_core::tts::openai::OpenAiTts;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::default();
    tracing::info!(listen_addr = %config.listen_addr, "starting dialog-core");

    let agents = InMemoryAgentStore::new();
    agents.insert(AgentConfig::stub("default"));

    let state = Arc::new(AppState {
        cache: Arc::new(ArtifactCache::new(&config.cache)),
        agents: Arc::new(agents) as Arc<dyn AgentStore>,
        stt: Arc::new(MockStt::new()),
        llm: Arc::new(OpenAiLlm::new()),
        tts: Arc::new(OpenAiTts::new()),
        config,
    });

    let reaper_cache = state.cache.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            reaper_cache.reap();
        }
    });

    let listen_addr = state.config.listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(%listen_addr, "listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}
