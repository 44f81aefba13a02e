//! Cache manager.

use super::backend::{CacheBackend, MemoryCache};
use super::chain::{ChainOutcome, FallbackChain};
use super::clock::Clock;
use super::key::{CacheKey, CacheKeyGenerator};
use crate::config::CacheSettings;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Snapshot of cache state for the admin view.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    /// Tier currently answering requests (`redis` or `in-memory`).
    pub backend: String,
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    /// Fraction in `0.0..=1.0`; `0.0` before the first request.
    pub hit_rate: f64,
    pub entry_count: usize,
}

impl CacheStats {
    /// Hit rate as a percentage rounded to two decimals.
    pub fn hit_rate_percent(&self) -> f64 {
        (self.hit_rate * 10_000.0).round() / 100.0
    }
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

/// Response cache with a primary/fallback tier chain and process-lifetime
/// hit/miss counters.
///
/// Reads and writes never fail from the caller's point of view: a tier error
/// is logged, recorded in the [`ChainOutcome`], and the next tier is used.
pub struct CacheManager {
    settings: CacheSettings,
    keys: CacheKeyGenerator,
    chain: FallbackChain,
    stats: AtomicStats,
}

impl CacheManager {
    pub fn new(settings: CacheSettings, chain: FallbackChain) -> Self {
        let keys = CacheKeyGenerator::new(settings.namespace.clone());
        Self {
            settings,
            keys,
            chain,
            stats: AtomicStats::new(),
        }
    }

    /// In-process store only.
    pub fn in_memory(settings: CacheSettings, clock: Arc<dyn Clock>) -> Self {
        let memory: Arc<dyn CacheBackend> = Arc::new(MemoryCache::with_clock(clock));
        Self::new(settings, FallbackChain::new(memory))
    }

    /// A remote primary in front of the in-process fallback.
    pub fn with_primary(
        settings: CacheSettings,
        primary: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let memory: Arc<dyn CacheBackend> = Arc::new(MemoryCache::with_clock(clock));
        Self::new(settings, FallbackChain::new(primary).then(memory))
    }

    /// Build from settings, connecting to the shared store when one is
    /// configured. An unreachable store is not fatal: the manager starts on the
    /// in-process tier alone.
    pub async fn from_settings(settings: CacheSettings, clock: Arc<dyn Clock>) -> Self {
        let Some(url) = settings.redis_url.clone().filter(|_| settings.enabled) else {
            info!("response cache using in-memory store");
            return Self::in_memory(settings, clock);
        };

        #[cfg(feature = "redis")]
        {
            match super::redis::RedisCache::connect(&url, settings.redis_timeout()).await {
                Ok(redis) => {
                    info!("response cache using redis with in-memory fallback");
                    return Self::with_primary(settings, Arc::new(redis), clock);
                }
                Err(e) => {
                    warn!(error = %e, "redis unavailable, using in-memory cache fallback");
                }
            }
        }
        #[cfg(not(feature = "redis"))]
        {
            warn!(url = %url, "redis support not compiled in, using in-memory cache fallback");
        }

        Self::in_memory(settings, clock)
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn default_ttl(&self) -> Duration {
        self.settings.ttl()
    }

    pub fn namespace(&self) -> &str {
        self.keys.namespace()
    }

    /// Key for a request text (raw prompt or session-scoped request) plus the
    /// generation parameters that shape the response.
    pub fn key_for(&self, request: &str, temperature: f64, max_tokens: u32) -> CacheKey {
        self.keys.generate(request, temperature, max_tokens)
    }

    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        self.get_with_report(key).await.and_then(|o| o.value)
    }

    /// Like [`get`](Self::get) but exposes which tier answered and which failed.
    /// Returns `None` when caching is disabled.
    pub async fn get_with_report(&self, key: &CacheKey) -> Option<ChainOutcome<Option<String>>> {
        if !self.settings.enabled {
            return None;
        }
        let outcome = self.chain.get(key).await;
        if outcome.value.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, backend = ?outcome.served_by, "cache hit");
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache miss");
        }
        Some(outcome)
    }

    /// Store `value` under `key`; `ttl` defaults to the configured TTL.
    /// Returns `false` when disabled, oversized, or rejected by every tier.
    pub async fn set(&self, key: &CacheKey, value: &str, ttl: Option<Duration>) -> bool {
        if !self.settings.enabled {
            return false;
        }
        if value.len() > self.settings.max_entry_bytes {
            debug!(key = %key, bytes = value.len(), "value exceeds cache entry limit, not cached");
            return false;
        }
        let ttl = ttl.unwrap_or_else(|| self.settings.ttl());
        self.chain.set(key, value, ttl).await.value > 0
    }

    pub async fn remove(&self, key: &CacheKey) -> bool {
        if !self.settings.enabled {
            return false;
        }
        self.chain.delete(key).await.value
    }

    /// Remove every namespaced entry in all tiers. Counters are left untouched.
    pub async fn flush(&self) -> usize {
        if !self.settings.enabled {
            return 0;
        }
        let outcome = self.chain.flush(self.keys.namespace()).await;
        info!(removed = outcome.value, degraded = outcome.degraded(), "cache flushed");
        outcome.value
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let entry_count = self.chain.len(self.keys.namespace()).await.value;
        CacheStats {
            enabled: self.settings.enabled,
            backend: self.chain.active_backend().to_string(),
            hits,
            misses,
            total_requests: total,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            entry_count,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.chain.active_backend()
    }
}
