//! Cache key generation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Namespaced, opaque cache key (`<namespace>:<sha256 hex>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }

    /// The namespace tag, i.e. everything before the first `:`.
    pub fn namespace(&self) -> Option<&str> {
        self.hash.split_once(':').map(|(ns, _)| ns)
    }

    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.namespace() == Some(namespace)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Derives cache keys from the request text plus the generation parameters.
///
/// The request text is either a raw prompt or a session-scoped request built by
/// [`crate::prompt::build_cache_key`]; either way it is trimmed before hashing.
#[derive(Debug, Clone)]
pub struct CacheKeyGenerator {
    namespace: String,
}

impl CacheKeyGenerator {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn generate(&self, request: &str, temperature: f64, max_tokens: u32) -> CacheKey {
        // BTreeMap keeps the canonical form sorted by key.
        let mut parts: BTreeMap<&str, Value> = BTreeMap::new();
        parts.insert("max_tokens", Value::from(max_tokens));
        parts.insert("prompt", Value::from(request.trim()));
        parts.insert("temperature", Value::from(temperature));
        let canonical = serde_json::to_string(&parts).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey::new(format!("{}:{}", self.namespace, hash))
    }
}

impl Default for CacheKeyGenerator {
    fn default() -> Self {
        Self::new("llm")
    }
}
