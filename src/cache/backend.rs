//! Cache backend implementations.

use super::clock::{system_clock, Clock};
use super::key::CacheKey;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    /// `None` when the TTL is too large to represent; such entries never expire.
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn new(value: String, ttl: Duration, now: DateTime<Utc>) -> Self {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl));
        Self { value, expires_at }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

/// One cache tier. Every call reports failure explicitly so that callers can
/// decide whether to fall through to the next tier.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>>;
    /// Fully replaces any previous value and expiry stored under `key`.
    async fn set(&self, key: &CacheKey, value: &str, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &CacheKey) -> Result<bool>;
    /// Remove every entry whose key carries `namespace`; returns the number removed.
    async fn flush_namespace(&self, namespace: &str) -> Result<usize>;
    /// Number of live entries in `namespace`.
    async fn len(&self, namespace: &str) -> Result<usize>;
    fn name(&self) -> &'static str;
}

/// In-process store used as the fallback tier.
///
/// Expiry is lazy: an expired entry is only dropped when it is read, or when a
/// flush or `len` scan walks the table. There is no background sweeper, so
/// memory held by entries that are never read again is bounded only by how
/// often the owner calls `flush`/`len`.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Raw number of stored entries, expired or not.
    pub fn raw_len(&self) -> usize {
        self.entries.len()
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>> {
        let now = self.clock.now();
        // remove_if releases the shard lock before returning; a plain get would
        // still hold a read guard here.
        if self
            .entries
            .remove_if(key.as_str(), |_, e| e.is_expired(now))
            .is_some()
        {
            return Ok(None);
        }
        Ok(self.entries.get(key.as_str()).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &CacheKey, value: &str, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(value.to_string(), ttl, self.clock.now());
        self.entries.insert(key.as_str().to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.remove(key.as_str()).is_some())
    }

    async fn flush_namespace(&self, namespace: &str) -> Result<usize> {
        self.purge_expired();
        let prefix = format!("{}:", namespace);
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(&prefix));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn len(&self, namespace: &str) -> Result<usize> {
        self.purge_expired();
        let prefix = format!("{}:", namespace);
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .count())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;

    fn key(s: &str) -> CacheKey {
        CacheKey::new(format!("llm:{s}"))
    }

    #[tokio::test]
    async fn expired_entries_are_removed_lazily_on_read() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = MemoryCache::with_clock(clock.clone());
        cache.set(&key("a"), "v", Duration::from_secs(1)).await.unwrap();

        clock.advance(Duration::from_secs(2));
        // Still physically present until somebody looks at it.
        assert_eq!(cache.raw_len(), 1);
        assert_eq!(cache.get(&key("a")).await.unwrap(), None);
        assert_eq!(cache.raw_len(), 0);
    }

    #[tokio::test]
    async fn set_replaces_value_and_expiry() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = MemoryCache::with_clock(clock.clone());
        cache.set(&key("a"), "old", Duration::from_secs(1)).await.unwrap();
        cache.set(&key("a"), "new", Duration::from_secs(10)).await.unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.get(&key("a")).await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn flush_only_touches_namespace() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set(&key("a"), "1", ttl).await.unwrap();
        cache.set(&key("b"), "2", ttl).await.unwrap();
        cache.set(&CacheKey::new("other:c"), "3", ttl).await.unwrap();

        assert_eq!(cache.len("llm").await.unwrap(), 2);
        assert_eq!(cache.flush_namespace("llm").await.unwrap(), 2);
        assert_eq!(cache.len("llm").await.unwrap(), 0);
        assert_eq!(cache.len("other").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn len_scan_drops_expired_entries() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = MemoryCache::with_clock(clock.clone());
        cache.set(&key("short"), "1", Duration::from_secs(1)).await.unwrap();
        cache.set(&key("long"), "2", Duration::from_secs(100)).await.unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.len("llm").await.unwrap(), 1);
        assert_eq!(cache.raw_len(), 1);
    }
}
