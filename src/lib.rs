//! # pocketllm-core
//!
//! Chat core for a small self-hosted LLM service.
//!
//! ## Overview
//!
//! The crate sits between an authenticated transport layer and an opaque
//! text-generation backend. It owns per-user conversation state, assembles
//! prompts from bounded history, caches responses under a deterministic key
//! and streams generated text as an ordered event sequence.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use pocketllm_core::{ChatRequest, Identity, ServiceConfig, ServiceContext};
//!
//! #[tokio::main]
//! async fn main() -> pocketllm_core::Result<()> {
//!     let ctx = ServiceContext::builder(ServiceConfig::from_env()?).connect().await;
//!     let me = Identity::user("alice");
//!
//!     let reply = ctx.chat(&me, ChatRequest::new("Hello!")).await?;
//!     println!("{}", reply.response);
//!
//!     let (mut events, _cancel) =
//!         ctx.chat_stream(&me, ChatRequest::new("And again").in_session(&reply.session_id))?;
//!     while let Some(event) = events.next().await {
//!         print!("{}", event.to_sse());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Response cache: key derivation, TTL backends, primary/fallback chain |
//! | [`session`] | Conversation store with ownership enforcement |
//! | [`prompt`] | History trimming and prompt assembly |
//! | [`tokens`] | Token estimation |
//! | [`backend`] | Generation capability seam and placeholder backend |
//! | [`orchestrator`] | Cache-or-generate decisions and streamed turns |
//! | [`context`] | Full request flows, history and admin operations |
//! | [`config`] | Service configuration |

pub mod backend;
pub mod cache;
pub mod config;
pub mod context;
pub mod orchestrator;
pub mod prompt;
pub mod session;
pub mod tokens;
pub mod types;

// Re-export main types for convenience
pub use backend::{GenerationParams, ModelInfo, TextBackend};
pub use cache::{CacheManager, CacheStats};
pub use config::ServiceConfig;
pub use context::{
    ChatRequest, ChatResponse, Identity, ServiceContext, ServiceContextBuilder, ServiceMetrics,
    SessionCounts,
};
pub use orchestrator::{CancelHandle, ChatStream, InferenceOrchestrator};
pub use session::ConversationStore;
pub use types::{ChatEvent, Message, MessageRole, Session};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A pinned, boxed stream of fallible items.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
