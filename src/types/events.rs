//! Chat streaming events and their wire encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of every encoded event record.
pub const EVENT_PREFIX: &str = "data: ";

/// One event of a streamed chat turn.
///
/// A stream is always `Start`, then zero or more `Token`, then exactly one of
/// `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEvent {
    Start {
        session_id: String,
        message_id: String,
    },
    Token {
        content: String,
    },
    Error {
        message: String,
    },
    Done {
        tokens_used: usize,
        cached: bool,
        timestamp: DateTime<Utc>,
    },
}

impl ChatEvent {
    pub fn token(content: impl Into<String>) -> Self {
        ChatEvent::Token {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ChatEvent::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done { .. } | ChatEvent::Error { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::Start { .. } => "start",
            ChatEvent::Token { .. } => "token",
            ChatEvent::Error { .. } => "error",
            ChatEvent::Done { .. } => "done",
        }
    }

    /// Encode as one server-sent-events record: `data: <json>` + blank line.
    pub fn to_sse(&self) -> String {
        let payload = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": e.to_string() }).to_string()
        });
        format!("{}{}\n\n", EVENT_PREFIX, payload)
    }

    /// Decode one record produced by [`to_sse`](Self::to_sse).
    pub fn from_sse(record: &str) -> Option<Self> {
        let line = record.trim();
        let payload = line.strip_prefix(EVENT_PREFIX.trim_end())?.trim_start();
        serde_json::from_str(payload).ok()
    }
}
