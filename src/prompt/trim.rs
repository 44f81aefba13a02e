//! History trimming: a coarse window cut, then a token-budget cut.

use crate::config::ConversationSettings;
use crate::tokens::{MultilingualEstimator, TokenCounter};
use crate::types::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimPolicy {
    /// Most recent K messages kept by the coarse cut.
    pub window: usize,
    /// Token budget applied to the windowed tail.
    pub token_budget: usize,
}

impl TrimPolicy {
    pub fn new(window: usize, token_budget: usize) -> Self {
        Self {
            window,
            token_budget,
        }
    }

    pub fn from_settings(settings: &ConversationSettings) -> Self {
        Self::new(settings.history_window, settings.token_budget)
    }

    pub fn trim<'a>(&self, history: &'a [Message]) -> &'a [Message] {
        self.trim_with(&MultilingualEstimator, history)
    }

    /// Keep the newest messages that fit the budget.
    ///
    /// The most recent message is always kept, even when it alone exceeds the
    /// budget; older messages are added newest-first and the walk stops at the
    /// first one that would overflow. The result is a contiguous suffix, so
    /// conversational order is untouched.
    pub fn trim_with<'a>(
        &self,
        counter: &dyn TokenCounter,
        history: &'a [Message],
    ) -> &'a [Message] {
        let windowed = &history[history.len().saturating_sub(self.window)..];
        if windowed.is_empty() {
            return windowed;
        }

        let mut start = windowed.len() - 1;
        let mut total = counter.count_message(&windowed[start]);
        while start > 0 {
            let cost = counter.count_message(&windowed[start - 1]);
            if total + cost > self.token_budget {
                break;
            }
            total += cost;
            start -= 1;
        }
        &windowed[start..]
    }
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self::from_settings(&ConversationSettings::default())
    }
}
