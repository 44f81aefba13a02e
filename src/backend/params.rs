use crate::config::ModelSettings;
use serde::{Deserialize, Serialize};

/// Sequences that end a completion: end-of-text, turn delimiters and
/// hallucinated role headers.
pub const DEFAULT_STOP_SEQUENCES: [&str; 6] = [
    "</s>",
    "<|im_end|>",
    "<|im_start|>",
    "\nUser:",
    "\nAI:",
    "\nAssistant:",
];

/// Per-request sampling parameters handed to a [`TextBackend`](super::TextBackend).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    #[serde(default)]
    pub stop: Vec<String>,
}

impl GenerationParams {
    pub fn from_settings(settings: &ModelSettings) -> Self {
        Self {
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: settings.top_p,
            stop: DEFAULT_STOP_SEQUENCES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        if let Some(n) = max_tokens {
            self.max_tokens = n;
        }
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        if let Some(t) = temperature {
            self.temperature = t;
        }
        self
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::from_settings(&ModelSettings::default())
    }
}

/// What the admin surface reports about the loaded model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub path: String,
    pub loaded: bool,
    pub backend: String,
    pub context_size: u32,
    pub threads: u32,
    pub gpu_layers: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

impl ModelInfo {
    pub fn from_settings(settings: &ModelSettings, loaded: bool, backend: impl Into<String>) -> Self {
        Self {
            path: settings.path.display().to_string(),
            loaded,
            backend: backend.into(),
            context_size: settings.context_size,
            threads: settings.threads,
            gpu_layers: settings.gpu_layers,
            temperature: settings.temperature,
            top_p: settings.top_p,
            max_tokens: settings.max_tokens,
        }
    }
}
