use crate::cache::{system_clock, Clock};
use crate::types::{Message, MessageRole, Session};
use crate::{Error, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

struct SessionSlot {
    session: Session,
    /// Set under the slot lock by delete/clear so that an append which already
    /// holds the `Arc` cannot write into a removed session.
    removed: bool,
}

type SlotRef = Arc<Mutex<SessionSlot>>;

/// In-process conversation store.
///
/// The session table is sharded (`DashMap`) and each session has its own lock:
/// mutations of one session are serialized, mutations of different sessions
/// proceed independently. Readers always get a cloned snapshot, so a message is
/// either fully visible or not at all.
pub struct ConversationStore {
    sessions: DashMap<String, SlotRef>,
    owners: DashMap<String, Vec<String>>,
    clock: Arc<dyn Clock>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            owners: DashMap::new(),
            clock,
        }
    }

    fn slot(&self, session_id: &str) -> Option<SlotRef> {
        self.sessions.get(session_id).map(|e| e.value().clone())
    }

    pub fn create_session(&self, owner_id: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), owner_id, self.clock.now());
        self.sessions.insert(
            id.clone(),
            Arc::new(Mutex::new(SessionSlot {
                session,
                removed: false,
            })),
        );
        self.owners
            .entry(owner_id.to_string())
            .or_default()
            .push(id.clone());
        debug!(session_id = %id, owner_id, "session created");
        id
    }

    /// Append one turn. The ownership check and the push happen under the
    /// session lock, so a concurrent delete either wins entirely (this call
    /// reports `NotFound`) or happens after the message is committed.
    pub fn append_message(
        &self,
        session_id: &str,
        owner_id: &str,
        role: MessageRole,
        content: &str,
        token_count: Option<usize>,
    ) -> Result<Message> {
        let message_id = Uuid::new_v4().to_string();
        self.append_message_with_id(session_id, owner_id, message_id, role, content, token_count)
    }

    /// Like [`append_message`](Self::append_message) with an id chosen by the
    /// caller, e.g. one already announced to a stream consumer.
    pub fn append_message_with_id(
        &self,
        session_id: &str,
        owner_id: &str,
        message_id: String,
        role: MessageRole,
        content: &str,
        token_count: Option<usize>,
    ) -> Result<Message> {
        let slot = self
            .slot(session_id)
            .ok_or_else(|| Error::not_found(session_id))?;
        let mut guard = slot.lock();
        if guard.removed {
            return Err(Error::not_found(session_id));
        }
        if !guard.session.is_owned_by(owner_id) {
            return Err(Error::ownership(session_id, owner_id));
        }

        let now = self.clock.now();
        let message = Message {
            id: message_id,
            session_id: session_id.to_string(),
            owner_id: owner_id.to_string(),
            role,
            content: content.to_string(),
            timestamp: now,
            token_count,
        };
        guard.session.messages.push(message.clone());
        guard.session.updated_at = guard.session.updated_at.max(now);
        Ok(message)
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        let slot = self.slot(session_id)?;
        let guard = slot.lock();
        (!guard.removed).then(|| guard.session.clone())
    }

    /// Snapshot of the session if `owner_id` owns it.
    pub fn authorize(&self, session_id: &str, owner_id: &str) -> Result<Session> {
        let session = self
            .get_session(session_id)
            .ok_or_else(|| Error::not_found(session_id))?;
        if !session.is_owned_by(owner_id) {
            return Err(Error::ownership(session_id, owner_id));
        }
        Ok(session)
    }

    /// Ordered messages of a session; empty when the session does not exist.
    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        self.get_session(session_id)
            .map(|s| s.messages)
            .unwrap_or_default()
    }

    /// Sessions of `owner_id` in creation order.
    pub fn list_sessions(&self, owner_id: &str) -> Vec<Session> {
        let ids = self
            .owners
            .get(owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get_session(id)).collect()
    }

    /// `Ok(false)` when the session does not exist.
    pub fn delete_session(&self, session_id: &str, owner_id: &str) -> Result<bool> {
        let Some(slot) = self.slot(session_id) else {
            return Ok(false);
        };
        {
            let mut guard = slot.lock();
            if guard.removed {
                return Ok(false);
            }
            if !guard.session.is_owned_by(owner_id) {
                return Err(Error::ownership(session_id, owner_id));
            }
            guard.removed = true;
        }
        self.sessions
            .remove_if(session_id, |_, v| Arc::ptr_eq(v, &slot));
        self.unindex(owner_id, session_id);
        info!(session_id, owner_id, "session deleted");
        Ok(true)
    }

    /// Remove every session. Returns the number removed.
    pub fn clear_all(&self) -> usize {
        let slots: Vec<SlotRef> = self.sessions.iter().map(|e| e.value().clone()).collect();
        let mut removed = 0;
        for slot in slots {
            let (id, owner_id) = {
                let mut guard = slot.lock();
                if guard.removed {
                    continue;
                }
                guard.removed = true;
                (guard.session.id.clone(), guard.session.owner_id.clone())
            };
            self.sessions.remove_if(&id, |_, v| Arc::ptr_eq(v, &slot));
            self.unindex(&owner_id, &id);
            removed += 1;
        }
        info!(removed, "all sessions cleared");
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of owners with at least one live session.
    pub fn owner_count(&self) -> usize {
        self.owners.iter().filter(|e| !e.value().is_empty()).count()
    }

    fn unindex(&self, owner_id: &str, session_id: &str) {
        if let Some(mut ids) = self.owners.get_mut(owner_id) {
            ids.retain(|id| id != session_id);
        }
        self.owners.remove_if(owner_id, |_, ids| ids.is_empty());
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}
