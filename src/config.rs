//! Service configuration structures
//!
//! Configuration is loaded once by the embedding application (YAML document,
//! environment, or both) and consumed read-only by the core.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the chat core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub conversation: ConversationSettings,
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Literal tag prepended to every key; bulk flush only touches this namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: usize,
    /// Shared remote store; `None` runs with the in-process store only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    #[serde(default = "default_redis_timeout_ms")]
    pub redis_timeout_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_ttl_seconds(),
            namespace: default_namespace(),
            max_entry_bytes: default_max_entry_bytes(),
            redis_url: None,
            redis_timeout_ms: default_redis_timeout_ms(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }
}

/// Generation backend settings and default sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
    #[serde(default = "default_context_size")]
    pub context_size: u32,
    #[serde(default = "default_threads")]
    pub threads: u32,
    #[serde(default)]
    pub gpu_layers: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Delay between placeholder words when streaming without a loaded model.
    #[serde(default = "default_placeholder_pacing_ms")]
    pub placeholder_pacing_ms: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            context_size: default_context_size(),
            threads: default_threads(),
            gpu_layers: 0,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            placeholder_pacing_ms: default_placeholder_pacing_ms(),
        }
    }
}

/// Conversation context assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSettings {
    /// Most recent K messages considered before the token budget cut.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            token_budget: default_token_budget(),
            system_prompt_path: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_ttl_seconds() -> u64 {
    3600
}
fn default_namespace() -> String {
    "llm".to_string()
}
fn default_max_entry_bytes() -> usize {
    1024 * 1024
}
fn default_redis_timeout_ms() -> u64 {
    5000
}
fn default_model_path() -> PathBuf {
    PathBuf::from("./models/tinyllama-1.1b-chat-q4.gguf")
}
fn default_context_size() -> u32 {
    2048
}
fn default_threads() -> u32 {
    4
}
fn default_temperature() -> f64 {
    0.7
}
fn default_top_p() -> f64 {
    0.95
}
fn default_max_tokens() -> u32 {
    512
}
fn default_placeholder_pacing_ms() -> u64 {
    50
}
fn default_history_window() -> usize {
    20
}
fn default_token_budget() -> usize {
    1024
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML document. Missing sections fall back to defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: ServiceConfig = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Defaults overridden by `POCKETLLM_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `POCKETLLM_*` overrides on top of the current values.
    ///
    /// Unparseable values are ignored, the same way malformed tuning knobs are
    /// ignored elsewhere; the result is validated afterwards.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_parse::<bool>("POCKETLLM_CACHE_ENABLED") {
            self.cache.enabled = v;
        }
        if let Some(v) = env_parse::<u64>("POCKETLLM_CACHE_TTL_SECONDS") {
            self.cache.ttl_seconds = v;
        }
        if let Ok(url) = std::env::var("POCKETLLM_REDIS_URL") {
            self.cache.redis_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Ok(path) = std::env::var("POCKETLLM_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(v) = env_parse::<f64>("POCKETLLM_MODEL_TEMPERATURE") {
            self.model.temperature = v;
        }
        if let Some(v) = env_parse::<f64>("POCKETLLM_MODEL_TOP_P") {
            self.model.top_p = v;
        }
        if let Some(v) = env_parse::<u32>("POCKETLLM_MODEL_MAX_TOKENS") {
            self.model.max_tokens = v;
        }
        if let Some(v) = env_parse::<usize>("POCKETLLM_HISTORY_WINDOW") {
            self.conversation.history_window = v;
        }
        if let Some(v) = env_parse::<usize>("POCKETLLM_HISTORY_TOKEN_BUDGET") {
            self.conversation.token_budget = v;
        }
        if let Ok(path) = std::env::var("POCKETLLM_SYSTEM_PROMPT_PATH") {
            self.conversation.system_prompt_path = Some(PathBuf::from(path));
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_seconds == 0 {
            return Err(invalid("cache.ttl_seconds", "must be greater than zero"));
        }
        if self.cache.namespace.trim().is_empty() {
            return Err(invalid("cache.namespace", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(invalid("model.temperature", "must be within 0.0..=2.0"));
        }
        if !(self.model.top_p > 0.0 && self.model.top_p <= 1.0) {
            return Err(invalid("model.top_p", "must be within (0.0, 1.0]"));
        }
        if self.model.max_tokens == 0 {
            return Err(invalid("model.max_tokens", "must be greater than zero"));
        }
        if self.conversation.history_window == 0 {
            return Err(invalid("conversation.history_window", "must be greater than zero"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn invalid(field: &str, details: &str) -> Error {
    Error::configuration_with_context(
        "invalid configuration value",
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("service_config"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_settings() {
        let cfg = ServiceConfig::default();
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.cache.ttl_seconds, 3600);
        assert_eq!(cfg.cache.namespace, "llm");
        assert_eq!(cfg.model.max_tokens, 512);
        assert!((cfg.model.temperature - 0.7).abs() < f64::EPSILON);
        assert!((cfg.model.top_p - 0.95).abs() < f64::EPSILON);
        assert_eq!(cfg.conversation.token_budget, 1024);
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg = ServiceConfig::from_yaml_str(
            r#"
cache:
  ttl_seconds: 60
conversation:
  history_window: 8
"#,
        )
        .unwrap();
        assert_eq!(cfg.cache.ttl_seconds, 60);
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.conversation.history_window, 8);
        assert_eq!(cfg.conversation.token_budget, 1024);
        assert_eq!(cfg.model.context_size, 2048);
    }

    #[test]
    fn invalid_values_are_rejected_with_field_path() {
        let err = ServiceConfig::from_yaml_str("model:\n  temperature: 3.5\n").unwrap_err();
        match err {
            Error::Configuration { context, .. } => {
                assert_eq!(context.field_path.as_deref(), Some("model.temperature"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = ServiceConfig::from_yaml_str("cache:\n  ttl_seconds: 0\n").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
