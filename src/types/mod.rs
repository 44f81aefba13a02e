//! Core data types shared by the store, the prompt assembler and the
//! orchestrator.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Session`] | Owned, ordered sequence of turns |
//! | [`Message`] | One immutable turn |
//! | [`MessageRole`] | `user` or `assistant` |
//! | [`ChatEvent`] | Event of a streamed turn (`start`, `token`, `error`, `done`) |

pub mod events;
pub mod message;

pub use events::ChatEvent;
pub use message::{Message, MessageRole, Session};
