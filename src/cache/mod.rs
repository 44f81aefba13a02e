//! Response caching module.
//!
//! Generated responses are cached under keys derived from the request text and
//! the generation parameters, so a hit is only ever served to a request that
//! could have produced exactly that value.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheManager`] | The cache store: get/set/flush, TTL, hit/miss statistics |
//! | [`FallbackChain`] | Primary-first tier list with explicit per-attempt results |
//! | [`CacheBackend`] | Trait for implementing cache tiers |
//! | [`MemoryCache`] | In-process tier with lazy expiry |
//! | `RedisCache` | Shared remote tier (feature `redis`) |
//! | [`CacheKeyGenerator`] | Canonical, SHA-256 based, namespaced key derivation |
//! | [`Clock`] | Time source; [`ManualClock`] simulates TTL expiry in tests |
//!
//! Concurrent misses on the same key are not coordinated: both requests
//! generate, and the last writer wins.

mod backend;
mod chain;
mod clock;
mod key;
mod manager;
#[cfg(feature = "redis")]
mod redis;

pub use backend::{CacheBackend, MemoryCache};
pub use chain::{BackendFailure, ChainOutcome, FallbackChain};
pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use key::{CacheKey, CacheKeyGenerator};
pub use manager::{CacheManager, CacheStats};
#[cfg(feature = "redis")]
pub use redis::RedisCache;
