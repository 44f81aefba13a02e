use super::{GenerationParams, ModelInfo, TextBackend};
use crate::config::ModelSettings;
use crate::prompt::last_user_turn;
use crate::{BoxStream, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;

const QUERY_PREVIEW_CHARS: usize = 50;

/// Stand-in used when no model is loaded.
///
/// Replies are a labelled, deterministic echo of the last user turn; streaming
/// emits the same text split at each space, with a fixed delay between pieces.
#[derive(Debug, Clone)]
pub struct PlaceholderBackend {
    settings: ModelSettings,
    pacing: Duration,
}

impl PlaceholderBackend {
    pub fn new(settings: ModelSettings) -> Self {
        let pacing = Duration::from_millis(settings.placeholder_pacing_ms);
        Self { settings, pacing }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn response_for(&self, prompt: &str) -> String {
        let query = last_user_turn(prompt).unwrap_or_else(|| prompt.trim());
        let preview: String = query.chars().take(QUERY_PREVIEW_CHARS).collect();
        format!(
            "[MOCK MODE] You asked: '{}'. The actual LLM model is not loaded. \
             To use a real model, please download a GGUF file to {}",
            preview,
            self.settings.path.display()
        )
    }
}

impl Default for PlaceholderBackend {
    fn default() -> Self {
        Self::new(ModelSettings::default())
    }
}

#[async_trait]
impl TextBackend for PlaceholderBackend {
    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        Ok(self.response_for(prompt))
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<BoxStream<'static, String>> {
        // Split on single spaces so the fragments concatenate back to the
        // single-shot text, runs of whitespace included.
        let words: Vec<String> = self
            .response_for(prompt)
            .split(' ')
            .map(str::to_string)
            .collect();
        let pacing = self.pacing;
        let stream = futures::stream::iter(words.into_iter().enumerate()).then(
            move |(i, word)| async move {
                if i > 0 && !pacing.is_zero() {
                    tokio::time::sleep(pacing).await;
                }
                Ok::<_, crate::Error>(if i == 0 { word } else { format!(" {word}") })
            },
        );
        Ok(Box::pin(stream))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo::from_settings(&self.settings, false, self.name())
    }

    fn is_loaded(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "placeholder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::build_prompt;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn echoes_last_user_turn_with_label() {
        let backend = PlaceholderBackend::default();
        let prompt = build_prompt(&[], "sys", "What is Rust?");
        let text = backend
            .generate(&prompt, &GenerationParams::default())
            .await
            .unwrap();
        assert!(text.starts_with("[MOCK MODE] You asked: 'What is Rust?'."));
        assert!(text.ends_with("./models/tinyllama-1.1b-chat-q4.gguf"));
        assert!(!backend.model_info().loaded);
    }

    #[tokio::test]
    async fn preview_is_capped() {
        let backend = PlaceholderBackend::default();
        let long = "x".repeat(80);
        let text = backend.response_for(&long);
        assert!(text.contains(&format!("'{}'", "x".repeat(50))));
        assert!(!text.contains(&"x".repeat(51)));
    }

    #[tokio::test]
    async fn stream_concatenates_to_single_shot() {
        let backend = PlaceholderBackend::default().with_pacing(Duration::ZERO);
        let params = GenerationParams::default();
        let prompt = build_prompt(&[], "sys", "hello there");

        let fragments: Vec<String> = backend
            .generate_stream(&prompt, &params)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(!fragments[0].starts_with(' '));
        assert!(fragments[1..].iter().all(|f| f.starts_with(' ')));
        assert_eq!(
            fragments.concat(),
            backend.generate(&prompt, &params).await.unwrap()
        );
    }

    #[tokio::test]
    async fn stream_keeps_inner_whitespace_of_the_query() {
        let backend = PlaceholderBackend::default().with_pacing(Duration::ZERO);
        let params = GenerationParams::default();
        let prompt = build_prompt(&[], "sys", "two  spaces\nand newline");

        let single = backend.generate(&prompt, &params).await.unwrap();
        assert!(single.contains("'two  spaces\nand newline'"));
        let fragments: Vec<String> = backend
            .generate_stream(&prompt, &params)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(fragments.concat(), single);
    }
}
