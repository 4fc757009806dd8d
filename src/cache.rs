//! Audio artifact cache (C9): a process-wide, concurrency-safe key-value
//! store for synthesized audio bytes, with TTL expiry, soft size-bound
//! LRU eviction, and eager per-session drop. `dashmap` gives lock-free
//! concurrent access the same way `streaming-core`'s runtime registries
//! use it for shared process-wide connection/handle state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::CacheConfig;
use crate::ids::{ArtifactId, SessionId};

struct Entry {
    bytes: Vec<u8>,
    content_type: &'static str,
    created_at: Instant,
    last_access: AtomicU64,
    session: SessionId,
}

/// Monotonic tick used for LRU ordering without an extra lock; seconds
/// since cache construction, coarse enough for eviction ordering.
fn now_ticks(epoch: Instant) -> u64 {
    epoch.elapsed().as_millis() as u64
}

pub struct ArtifactCache {
    entries: DashMap<ArtifactId, Entry>,
    epoch: Instant,
    ttl: Duration,
    max_total_bytes: usize,
}

impl ArtifactCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self { entries: DashMap::new(), epoch: Instant::now(), ttl: config.ttl, max_total_bytes: config.max_total_bytes }
    }

    /// Store an artifact, returning its opaque id.
    pub fn put(&self, session: SessionId, bytes: Vec<u8>, content_type: &'static str) -> ArtifactId {
        let id = ArtifactId::new();
        self.entries.insert(
            id,
            Entry { bytes, content_type, created_at: Instant::now(), last_access: AtomicU64::new(now_ticks(self.epoch)), session },
        );
        id
    }

    /// Fetch an artifact by id, `None` if absent or past TTL.
    pub fn get(&self, id: ArtifactId) -> Option<(Vec<u8>, &'static str)> {
        let entry = self.entries.get(&id)?;
        if entry.created_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&id);
            return None;
        }
        entry.last_access.store(now_ticks(self.epoch), Ordering::Relaxed);
        Some((entry.bytes.clone(), entry.content_type))
    }

    /// Background reaper pass: drop TTL-expired entries, then evict LRU
    /// entries while the soft size bound is exceeded.
    pub fn reap(&self) {
        self.entries.retain(|_, entry| entry.created_at.elapsed() <= self.ttl);

        let total: usize = self.entries.iter().map(|e| e.bytes.len()).sum();
        if total <= self.max_total_bytes {
            return;
        }

        let mut by_access: Vec<(ArtifactId, u64)> =
            self.entries.iter().map(|e| (*e.key(), e.last_access.load(Ordering::Relaxed))).collect();
        by_access.sort_by_key(|(_, ticks)| *ticks);

        let mut freed = 0usize;
        let mut need = total - self.max_total_bytes;
        for (id, _) in by_access {
            if need == 0 {
                break;
            }
            if let Some((_, entry)) = self.entries.remove(&id) {
                freed += entry.bytes.len();
                need = need.saturating_sub(entry.bytes.len());
            }
        }
        let _ = freed;
    }

    /// Eagerly drop every artifact created by `session`, on session close.
    pub fn drop_session(&self, session: SessionId) {
        self.entries.retain(|_, entry| entry.session != session);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
