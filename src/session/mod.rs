//! Conversation sessions: lifecycle, ownership enforcement and ordered history.
//!
//! Every mutation checks that the caller owns the session; a mismatch is an
//! [`Error::OwnershipViolation`](crate::Error::OwnershipViolation) and nothing is
//! written.

mod store;

pub use crate::types::{Message, MessageRole, Session};
pub use store::ConversationStore;
