//! Token counter implementations.

use crate::types::Message;

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    fn count_message(&self, message: &Message) -> usize {
        self.count(&message.content)
    }

    fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

fn is_cjk_ideograph(c: char) -> bool {
    ('\u{4E00}'..='\u{9FFF}').contains(&c)
}

/// Crude multilingual estimate used for history trimming.
///
/// Each CJK ideograph (U+4E00..=U+9FFF) weighs 2; every whitespace-delimited
/// word weighs 1. A run of ideographs without spaces also counts as one word.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultilingualEstimator;

impl MultilingualEstimator {
    pub fn new() -> Self {
        Self
    }
}

impl TokenCounter for MultilingualEstimator {
    fn count(&self, text: &str) -> usize {
        let ideographs = text.chars().filter(|c| is_cjk_ideograph(*c)).count();
        let words = text.split_whitespace().count();
        ideographs * 2 + words
    }
}

/// Whitespace word count, used for the `tokens_used` figure of a response.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCountEstimator;

impl WordCountEstimator {
    pub fn new() -> Self {
        Self
    }
}

impl TokenCounter for WordCountEstimator {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Shorthand for [`MultilingualEstimator`].
pub fn estimate_tokens(text: &str) -> usize {
    MultilingualEstimator.count(text)
}

/// Shorthand for [`WordCountEstimator`].
pub fn word_count(text: &str) -> usize {
    WordCountEstimator.count(text)
}
