//! Prompt assembly.
//!
//! Turns a bounded message history plus the new user turn into one
//! backend-ready prompt using a fixed `<|im_start|>role\ncontent<|im_end|>`
//! turn layout, and defines the cache scope of a request.

mod builder;
mod trim;

pub use builder::{
    build_cache_key, build_prompt, last_user_turn, load_system_prompt, PromptBuilder,
    DEFAULT_SYSTEM_PROMPT, TURN_END, TURN_START,
};
pub use trim::TrimPolicy;
