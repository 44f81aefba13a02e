//! Text-generation capability.
//!
//! The model runtime itself lives outside this crate; [`TextBackend`] is the
//! seam it plugs into. [`PlaceholderBackend`] answers when nothing is loaded and
//! [`DegradingBackend`] switches between the two.

mod cleanup;
mod degrading;
mod params;
mod placeholder;

pub use cleanup::{clean_response, strip_role_prefix};
pub use degrading::DegradingBackend;
pub use params::{GenerationParams, ModelInfo, DEFAULT_STOP_SEQUENCES};
pub use placeholder::PlaceholderBackend;

use crate::{BoxStream, Result};
use async_trait::async_trait;

#[async_trait]
pub trait TextBackend: Send + Sync {
    /// Produce the full completion for `prompt`.
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;

    /// Produce the completion as a finite sequence of text fragments.
    ///
    /// Dropping the returned stream abandons the generation.
    async fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<BoxStream<'static, String>>;

    fn model_info(&self) -> ModelInfo;

    fn is_loaded(&self) -> bool;

    fn name(&self) -> &'static str;
}
