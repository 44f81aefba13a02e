use super::{GenerationParams, ModelInfo, PlaceholderBackend, TextBackend};
use crate::{BoxStream, Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Routes to a real backend when one is loaded and to the placeholder otherwise.
///
/// `BackendUnavailable` from the primary is absorbed and answered by the
/// placeholder. Any other error is passed through unchanged.
pub struct DegradingBackend {
    primary: Option<Arc<dyn TextBackend>>,
    placeholder: PlaceholderBackend,
}

impl DegradingBackend {
    pub fn new(primary: Option<Arc<dyn TextBackend>>, placeholder: PlaceholderBackend) -> Self {
        Self {
            primary,
            placeholder,
        }
    }

    pub fn placeholder_only(placeholder: PlaceholderBackend) -> Self {
        Self::new(None, placeholder)
    }

    fn live(&self) -> Option<&Arc<dyn TextBackend>> {
        self.primary.as_ref().filter(|p| p.is_loaded())
    }
}

#[async_trait]
impl TextBackend for DegradingBackend {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        if let Some(primary) = self.live() {
            match primary.generate(prompt, params).await {
                Err(e @ Error::BackendUnavailable { .. }) => {
                    warn!(backend = primary.name(), error = %e, "primary backend unavailable, using placeholder");
                }
                other => return other,
            }
        }
        self.placeholder.generate(prompt, params).await
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<BoxStream<'static, String>> {
        if let Some(primary) = self.live() {
            match primary.generate_stream(prompt, params).await {
                Err(e @ Error::BackendUnavailable { .. }) => {
                    warn!(backend = primary.name(), error = %e, "primary backend unavailable, streaming placeholder");
                }
                other => return other,
            }
        }
        self.placeholder.generate_stream(prompt, params).await
    }

    fn model_info(&self) -> ModelInfo {
        match &self.primary {
            Some(primary) => primary.model_info(),
            None => self.placeholder.model_info(),
        }
    }

    fn is_loaded(&self) -> bool {
        self.live().is_some()
    }

    fn name(&self) -> &'static str {
        self.live().map_or(self.placeholder.name(), |p| p.name())
    }
}
