//! Prompt assembly and cache scope keys.

use super::trim::TrimPolicy;
use crate::types::{Message, MessageRole};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

pub const TURN_START: &str = "<|im_start|>";
pub const TURN_END: &str = "<|im_end|>";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Template leftovers stripped from instruction files.
const TEMPLATE_MARKERS: [&str; 2] = ["Instruction: {prompt}", "Response:"];

fn push_turn(prompt: &mut String, role: &str, content: &str) {
    prompt.push_str(TURN_START);
    prompt.push_str(role);
    prompt.push('\n');
    prompt.push_str(content);
    prompt.push_str(TURN_END);
    prompt.push('\n');
}

/// Render history plus the new user turn, ending with an open assistant turn
/// the backend completes.
///
/// Content is trimmed and empty messages are skipped entirely.
pub fn build_prompt(history: &[Message], system_prompt: &str, new_user_turn: &str) -> String {
    let mut prompt = String::new();
    push_turn(&mut prompt, "system", system_prompt.trim());
    for msg in history {
        let content = msg.content.trim();
        if content.is_empty() {
            continue;
        }
        push_turn(&mut prompt, msg.role.as_str(), content);
    }
    push_turn(&mut prompt, MessageRole::User.as_str(), new_user_turn.trim());
    prompt.push_str(TURN_START);
    prompt.push_str(MessageRole::Assistant.as_str());
    prompt.push('\n');
    prompt
}

/// Content of the last user turn in a prompt built by [`build_prompt`].
pub fn last_user_turn(prompt: &str) -> Option<&str> {
    let marker = format!("{}{}\n", TURN_START, MessageRole::User.as_str());
    let start = prompt.rfind(&marker)? + marker.len();
    let rest = &prompt[start..];
    let end = rest.find(TURN_END).unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// Read an instruction file, falling back to [`DEFAULT_SYSTEM_PROMPT`] when the
/// file is missing, unreadable or empty.
pub fn load_system_prompt(source: Option<&Path>) -> String {
    let Some(path) = source else {
        return DEFAULT_SYSTEM_PROMPT.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let mut content = raw.trim().to_string();
            for marker in TEMPLATE_MARKERS {
                content = content.replace(marker, "").trim().to_string();
            }
            if content.is_empty() {
                DEFAULT_SYSTEM_PROMPT.to_string()
            } else {
                content
            }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "system prompt unreadable, using default");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

/// Canonical request text scoping a cached response to one owner, one session
/// and one exact prompt. The generation parameters are added on top by
/// [`CacheKeyGenerator`](crate::cache::CacheKeyGenerator).
pub fn build_cache_key(
    owner_id: &str,
    session_id: &str,
    prompt: &str,
    previous_response: Option<&str>,
) -> String {
    let mut fields: BTreeMap<&str, Value> = BTreeMap::new();
    fields.insert("owner_id", Value::from(owner_id));
    fields.insert("session_id", Value::from(session_id));
    fields.insert("prompt", Value::from(prompt.trim()));
    if let Some(prev) = previous_response {
        fields.insert("prev_response", Value::from(prev.trim()));
    }
    serde_json::to_string(&fields).unwrap_or_default()
}

/// Trims history and renders prompts with a fixed system instruction.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
    policy: TrimPolicy,
}

impl PromptBuilder {
    pub fn new(system_prompt: impl Into<String>, policy: TrimPolicy) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            policy,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn policy(&self) -> TrimPolicy {
        self.policy
    }

    /// Trim `history` (previous turns, not including the new one) and render.
    pub fn build(&self, history: &[Message], new_user_turn: &str) -> String {
        build_prompt(self.policy.trim(history), &self.system_prompt, new_user_turn)
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT, TrimPolicy::default())
    }
}
