//! Server and pipeline configuration, loaded from the environment with
//! documented defaults — the same env-var-with-fallback style
//! `voice::stt::whisper` uses for `WHISPER_MODEL`.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Voice-activity edge-detector configuration.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Classifier aggressiveness, 0-3.
    pub aggressiveness: u8,
    /// Consecutive speech frames to declare `speech_start` (default 3 -> 90ms).
    pub speech_start_frames: u32,
    /// Consecutive non-speech frames to declare `speech_end` (default ~27 -> ~800ms).
    pub speech_end_frames: u32,
    /// Pre-speech ring buffer length in milliseconds (default 150ms).
    pub pre_speech_buffer_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            aggressiveness: env_or("VAD_AGGRESSIVENESS", 2),
            speech_start_frames: env_or("VAD_SPEECH_START_FRAMES", 3),
            speech_end_frames: env_or("VAD_SPEECH_END_FRAMES", 27),
            pre_speech_buffer_ms: env_or("VAD_PRE_SPEECH_MS", 150),
        }
    }
}

/// Response chunker configuration.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Soft cap in characters before a unit is forcibly emitted.
    pub soft_cap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            soft_cap_chars: env_or("CHUNKER_SOFT_CAP_CHARS", 240),
        }
    }
}

/// Timeouts bounding how long the controller waits on external parties
/// before treating the wait itself as a failure.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub idle_session: Duration,
    pub llm_start: Duration,
    pub tts_unit: Duration,
    pub stt_inactivity: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_session: Duration::from_secs(env_or("TIMEOUT_IDLE_SESSION_SECS", 600)),
            llm_start: Duration::from_secs(env_or("TIMEOUT_LLM_START_SECS", 30)),
            tts_unit: Duration::from_secs(env_or("TIMEOUT_TTS_UNIT_SECS", 20)),
            stt_inactivity: Duration::from_secs(env_or("TIMEOUT_STT_INACTIVITY_SECS", 60)),
        }
    }
}

/// Audio artifact cache configuration (C9).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// Soft byte-size bound; the reaper evicts LRU entries once exceeded.
    pub max_total_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(env_or("ARTIFACT_TTL_SECS", 300)),
            max_total_bytes: env_or("ARTIFACT_CACHE_MAX_BYTES", 256 * 1024 * 1024),
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub vad: VadConfig,
    pub chunker: ChunkerConfig,
    pub timeouts: TimeoutConfig,
    pub cache: CacheConfig,
    /// Max TTS units synthesized concurrently per turn (default K=3).
    pub tts_concurrency: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            vad: VadConfig::default(),
            chunker: ChunkerConfig::default(),
            timeouts: TimeoutConfig::default(),
            cache: CacheConfig::default(),
            tts_concurrency: env_or("TTS_CONCURRENCY", 3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let vad = VadConfig::default();
        assert_eq!(vad.speech_start_frames, 3);
        assert_eq!(vad.speech_end_frames, 27);

        let chunker = ChunkerConfig::default();
        assert_eq!(chunker.soft_cap_chars, 240);

        let cache = CacheConfig::default();
        assert_eq!(cache.ttl, Duration::from_secs(300));
    }
}
