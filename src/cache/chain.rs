//! Ordered tiers of cache backends with explicit per-attempt results.
//!
//! Each tier call produces a tagged `Result`; the chain decides whether the
//! result is decisive or whether to move on, and keeps every failure so callers
//! (and tests) can see why a tier was skipped.

use super::backend::CacheBackend;
use super::key::CacheKey;
use crate::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A tier that failed during one chain operation.
#[derive(Debug)]
pub struct BackendFailure {
    pub backend: &'static str,
    pub error: Error,
}

/// Result of running one operation across the chain.
#[derive(Debug)]
pub struct ChainOutcome<T> {
    pub value: T,
    /// Tier that produced the decisive answer, if any did.
    pub served_by: Option<&'static str>,
    pub failures: Vec<BackendFailure>,
}

impl<T> ChainOutcome<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            served_by: None,
            failures: Vec::new(),
        }
    }

    pub fn degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

struct Tier {
    backend: Arc<dyn CacheBackend>,
    healthy: AtomicBool,
}

/// Primary-first list of cache tiers. The last tier is the one expected to
/// never fail (the in-process store).
pub struct FallbackChain {
    tiers: Vec<Tier>,
}

impl FallbackChain {
    pub fn new(primary: Arc<dyn CacheBackend>) -> Self {
        Self {
            tiers: vec![Tier {
                backend: primary,
                healthy: AtomicBool::new(true),
            }],
        }
    }

    pub fn then(mut self, fallback: Arc<dyn CacheBackend>) -> Self {
        self.tiers.push(Tier {
            backend: fallback,
            healthy: AtomicBool::new(true),
        });
        self
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|t| t.backend.name()).collect()
    }

    /// First tier whose most recent call succeeded.
    pub fn active_backend(&self) -> &'static str {
        self.tiers
            .iter()
            .find(|t| t.healthy.load(Ordering::Relaxed))
            .or_else(|| self.tiers.last())
            .map(|t| t.backend.name())
            .unwrap_or("none")
    }

    fn record<T>(&self, tier: &Tier, res: &crate::Result<T>, op: &'static str) {
        let ok = res.is_ok();
        let was = tier.healthy.swap(ok, Ordering::Relaxed);
        if let Err(e) = res {
            if was {
                warn!(backend = tier.backend.name(), op, error = %e, "cache tier failed, falling through");
            }
        }
    }

    /// Walk tiers until one has the key. A tier answering "absent" is not
    /// decisive: a later tier may hold a copy written while the earlier one was down.
    pub async fn get(&self, key: &CacheKey) -> ChainOutcome<Option<String>> {
        let mut outcome = ChainOutcome::new(None);
        for tier in &self.tiers {
            let res = tier.backend.get(key).await;
            self.record(tier, &res, "get");
            match res {
                Ok(Some(v)) => {
                    outcome.value = Some(v);
                    outcome.served_by = Some(tier.backend.name());
                    return outcome;
                }
                Ok(None) => {
                    if outcome.served_by.is_none() {
                        outcome.served_by = Some(tier.backend.name());
                    }
                }
                Err(error) => outcome.failures.push(BackendFailure {
                    backend: tier.backend.name(),
                    error,
                }),
            }
        }
        outcome
    }

    /// Write to every tier; the value is the number of tiers that accepted it.
    pub async fn set(&self, key: &CacheKey, value: &str, ttl: Duration) -> ChainOutcome<usize> {
        let mut outcome = ChainOutcome::new(0);
        for tier in &self.tiers {
            let res = tier.backend.set(key, value, ttl).await;
            self.record(tier, &res, "set");
            match res {
                Ok(()) => {
                    outcome.value += 1;
                    outcome.served_by.get_or_insert(tier.backend.name());
                }
                Err(error) => outcome.failures.push(BackendFailure {
                    backend: tier.backend.name(),
                    error,
                }),
            }
        }
        outcome
    }

    pub async fn delete(&self, key: &CacheKey) -> ChainOutcome<bool> {
        let mut outcome = ChainOutcome::new(false);
        for tier in &self.tiers {
            let res = tier.backend.delete(key).await;
            self.record(tier, &res, "delete");
            match res {
                Ok(removed) => outcome.value |= removed,
                Err(error) => outcome.failures.push(BackendFailure {
                    backend: tier.backend.name(),
                    error,
                }),
            }
        }
        outcome
    }

    /// Flush the namespace in every tier; the value is the summed removal count.
    pub async fn flush(&self, namespace: &str) -> ChainOutcome<usize> {
        let mut outcome = ChainOutcome::new(0);
        for tier in &self.tiers {
            let res = tier.backend.flush_namespace(namespace).await;
            self.record(tier, &res, "flush");
            match res {
                Ok(n) => outcome.value += n,
                Err(error) => outcome.failures.push(BackendFailure {
                    backend: tier.backend.name(),
                    error,
                }),
            }
        }
        outcome
    }

    /// Entry count from the first tier able to answer.
    pub async fn len(&self, namespace: &str) -> ChainOutcome<usize> {
        let mut outcome = ChainOutcome::new(0);
        for tier in &self.tiers {
            let res = tier.backend.len(namespace).await;
            self.record(tier, &res, "len");
            match res {
                Ok(n) => {
                    outcome.value = n;
                    outcome.served_by = Some(tier.backend.name());
                    return outcome;
                }
                Err(error) => outcome.failures.push(BackendFailure {
                    backend: tier.backend.name(),
                    error,
                }),
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryCache;
    use crate::{ErrorContext, Result};
    use async_trait::async_trait;

    struct DownBackend;

    #[async_trait]
    impl CacheBackend for DownBackend {
        async fn get(&self, _: &CacheKey) -> Result<Option<String>> {
            Err(down())
        }
        async fn set(&self, _: &CacheKey, _: &str, _: Duration) -> Result<()> {
            Err(down())
        }
        async fn delete(&self, _: &CacheKey) -> Result<bool> {
            Err(down())
        }
        async fn flush_namespace(&self, _: &str) -> Result<usize> {
            Err(down())
        }
        async fn len(&self, _: &str) -> Result<usize> {
            Err(down())
        }
        fn name(&self) -> &'static str {
            "down"
        }
    }

    fn down() -> Error {
        Error::cache_with_context("connection refused", ErrorContext::new().with_source("test"))
    }

    #[tokio::test]
    async fn failing_primary_falls_through_and_is_reported() {
        let chain = FallbackChain::new(Arc::new(DownBackend)).then(Arc::new(MemoryCache::new()));
        let key = CacheKey::new("llm:k");

        let set = chain.set(&key, "v", Duration::from_secs(60)).await;
        assert_eq!(set.value, 1);
        assert_eq!(set.served_by, Some("in-memory"));
        assert_eq!(set.failures.len(), 1);
        assert_eq!(set.failures[0].backend, "down");

        let got = chain.get(&key).await;
        assert_eq!(got.value.as_deref(), Some("v"));
        assert_eq!(got.served_by, Some("in-memory"));
        assert!(got.degraded());
        assert_eq!(chain.active_backend(), "in-memory");
    }

    #[tokio::test]
    async fn absent_in_primary_still_consults_fallback() {
        let primary = Arc::new(MemoryCache::new());
        let fallback = Arc::new(MemoryCache::new());
        let key = CacheKey::new("llm:k");
        fallback.set(&key, "only-here", Duration::from_secs(60)).await.unwrap();

        let chain = FallbackChain::new(primary).then(fallback);
        let got = chain.get(&key).await;
        assert_eq!(got.value.as_deref(), Some("only-here"));
        assert!(!got.degraded());
    }
}
