//! Per-turn composition of the chat core.
//!
//! [`ServiceContext`] owns the cache, the conversation store and the
//! orchestrator, and runs the complete flow for one request: resolve or create
//! the session, record the user turn, trim and build the prompt, infer, record
//! the reply. Identity is supplied by the caller and trusted as given.

use crate::backend::{
    DegradingBackend, GenerationParams, ModelInfo, PlaceholderBackend, TextBackend,
};
use crate::cache::{system_clock, CacheManager, CacheStats, Clock};
use crate::config::ServiceConfig;
use crate::orchestrator::{CancelHandle, ChatStream, InferenceOrchestrator, TurnRequest};
use crate::prompt::{build_cache_key, load_system_prompt, PromptBuilder, TrimPolicy};
use crate::session::{ConversationStore, Message, MessageRole, Session};
use crate::tokens::{estimate_tokens, word_count};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Verified caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub owner_id: String,
    pub is_admin: bool,
}

impl Identity {
    pub fn user(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            is_admin: false,
        }
    }

    pub fn admin(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            is_admin: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message_id: String,
    pub session_id: String,
    pub response: String,
    pub tokens_used: usize,
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceMetrics {
    pub total_requests: u64,
    pub uptime_seconds: f64,
    pub active_sessions: usize,
    pub total_owners: usize,
    /// Percentage, two decimals.
    pub cache_hit_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub total_sessions: usize,
    pub total_users: usize,
}

pub struct ServiceContext {
    config: ServiceConfig,
    cache: Arc<CacheManager>,
    store: Arc<ConversationStore>,
    orchestrator: InferenceOrchestrator,
    prompts: PromptBuilder,
    total_requests: AtomicU64,
    started: Instant,
}

impl ServiceContext {
    pub fn builder(config: ServiceConfig) -> ServiceContextBuilder {
        ServiceContextBuilder::new(config)
    }

    /// In-memory cache, system clock, placeholder backend.
    pub fn in_memory(config: ServiceConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    fn count_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn require_admin(&self, identity: &Identity, action: &str) -> Result<()> {
        if identity.is_admin {
            Ok(())
        } else {
            Err(Error::permission_denied(format!(
                "{action} requires admin privileges"
            )))
        }
    }

    fn params_for(&self, request: &ChatRequest) -> GenerationParams {
        GenerationParams::from_settings(&self.config.model)
            .with_max_tokens(request.max_tokens)
            .with_temperature(request.temperature)
    }

    /// Resolve the target session, record the user turn and build everything
    /// the orchestrator needs.
    fn open_turn(&self, identity: &Identity, request: &ChatRequest) -> Result<TurnRequest> {
        let owner_id = identity.owner_id.as_str();
        let session = match &request.session_id {
            Some(id) => self.store.authorize(id, owner_id)?,
            None => {
                let id = self.store.create_session(owner_id);
                self.store.authorize(&id, owner_id)?
            }
        };

        self.store.append_message(
            &session.id,
            owner_id,
            MessageRole::User,
            &request.prompt,
            Some(estimate_tokens(&request.prompt)),
        )?;

        // The key covers the assembled prompt, so a reply is only reused for a
        // request carrying the same trimmed history.
        let prompt = self.prompts.build(&session.messages, &request.prompt);
        let previous = session.last_assistant_message().map(|m| m.content.as_str());
        let scope = build_cache_key(owner_id, &session.id, &prompt, previous);
        debug!(session_id = %session.id, history = session.len(), "turn prepared");

        Ok(TurnRequest {
            owner_id: owner_id.to_string(),
            session_id: session.id,
            scope,
            prompt,
            params: self.params_for(request),
        })
    }

    /// One complete single-shot turn.
    ///
    /// A generation failure comes back as the reply text and is stored as the
    /// assistant turn like any other reply.
    pub async fn chat(&self, identity: &Identity, request: ChatRequest) -> Result<ChatResponse> {
        self.count_request();
        let turn = self.open_turn(identity, &request)?;
        let (text, cached) = self
            .orchestrator
            .infer(&turn.scope, &turn.prompt, &turn.params)
            .await;

        let tokens_used = word_count(&text);
        let message = self.store.append_message(
            &turn.session_id,
            &turn.owner_id,
            MessageRole::Assistant,
            &text,
            Some(tokens_used),
        )?;
        Ok(ChatResponse {
            message_id: message.id,
            session_id: turn.session_id,
            response: text,
            tokens_used,
            cached,
            timestamp: message.timestamp,
        })
    }

    /// One streamed turn. Session and ownership errors are returned before
    /// anything is streamed.
    pub fn chat_stream(
        &self,
        identity: &Identity,
        request: ChatRequest,
    ) -> Result<(ChatStream, CancelHandle)> {
        self.count_request();
        let turn = self.open_turn(identity, &request)?;
        Ok(self.orchestrator.stream(turn))
    }

    /// The caller's sessions in creation order.
    pub fn history(&self, identity: &Identity) -> Vec<Session> {
        self.count_request();
        self.store.list_sessions(&identity.owner_id)
    }

    pub fn session_history(&self, identity: &Identity, session_id: &str) -> Result<Session> {
        self.count_request();
        self.store.authorize(session_id, &identity.owner_id)
    }

    pub fn session_messages(&self, identity: &Identity, session_id: &str) -> Result<Vec<Message>> {
        self.session_history(identity, session_id).map(|s| s.messages)
    }

    pub fn delete_session(&self, identity: &Identity, session_id: &str) -> Result<()> {
        self.count_request();
        if self.store.delete_session(session_id, &identity.owner_id)? {
            Ok(())
        } else {
            Err(Error::not_found(session_id))
        }
    }

    /// Drop every cached response. Hit/miss counters are kept.
    pub async fn flush_cache(&self, identity: &Identity) -> Result<usize> {
        self.count_request();
        self.require_admin(identity, "cache flush")?;
        let removed = self.cache.flush().await;
        info!(removed, admin = %identity.owner_id, "cache flushed");
        Ok(removed)
    }

    pub async fn cache_stats(&self, identity: &Identity) -> Result<CacheStats> {
        self.count_request();
        self.require_admin(identity, "cache stats")?;
        Ok(self.cache.stats().await)
    }

    pub fn model_info(&self, identity: &Identity) -> Result<ModelInfo> {
        self.count_request();
        self.require_admin(identity, "model info")?;
        Ok(self.orchestrator.backend().model_info())
    }

    pub async fn metrics(&self, identity: &Identity) -> Result<ServiceMetrics> {
        self.count_request();
        self.require_admin(identity, "metrics")?;
        let cache = self.cache.stats().await;
        Ok(ServiceMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            uptime_seconds: self.started.elapsed().as_secs_f64(),
            active_sessions: self.store.session_count(),
            total_owners: self.store.owner_count(),
            cache_hit_rate: cache.hit_rate_percent(),
        })
    }

    pub fn session_counts(&self, identity: &Identity) -> Result<SessionCounts> {
        self.count_request();
        self.require_admin(identity, "session counts")?;
        Ok(SessionCounts {
            total_sessions: self.store.session_count(),
            total_users: self.store.owner_count(),
        })
    }

    pub fn clear_sessions(&self, identity: &Identity) -> Result<usize> {
        self.count_request();
        self.require_admin(identity, "session reset")?;
        Ok(self.store.clear_all())
    }
}

/// Assembles a [`ServiceContext`]; unset parts get in-process defaults.
pub struct ServiceContextBuilder {
    config: ServiceConfig,
    clock: Option<Arc<dyn Clock>>,
    backend: Option<Arc<dyn TextBackend>>,
    cache: Option<Arc<CacheManager>>,
    system_prompt: Option<String>,
}

impl ServiceContextBuilder {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            clock: None,
            backend: None,
            cache: None,
            system_prompt: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Backend used as-is. Without one, a placeholder-only
    /// [`DegradingBackend`] is used.
    pub fn backend(mut self, backend: Arc<dyn TextBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Real model backend, wrapped so that it degrades to the placeholder.
    pub fn primary_backend(self, primary: Arc<dyn TextBackend>) -> Self {
        let placeholder = PlaceholderBackend::new(self.config.model.clone());
        self.backend(Arc::new(DegradingBackend::new(Some(primary), placeholder)))
    }

    pub fn cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Build with the in-memory cache unless one was supplied.
    pub fn build(self) -> ServiceContext {
        let clock = self.clock.clone().unwrap_or_else(system_clock);
        let cache = self.cache.clone().unwrap_or_else(|| {
            Arc::new(CacheManager::in_memory(self.config.cache.clone(), clock.clone()))
        });
        self.assemble(cache, clock)
    }

    /// Build, connecting to the configured remote cache when there is one.
    pub async fn connect(self) -> ServiceContext {
        let clock = self.clock.clone().unwrap_or_else(system_clock);
        let cache = match self.cache.clone() {
            Some(cache) => cache,
            None => Arc::new(CacheManager::from_settings(self.config.cache.clone(), clock.clone()).await),
        };
        self.assemble(cache, clock)
    }

    fn assemble(self, cache: Arc<CacheManager>, clock: Arc<dyn Clock>) -> ServiceContext {
        let backend = self.backend.unwrap_or_else(|| {
            Arc::new(DegradingBackend::placeholder_only(PlaceholderBackend::new(
                self.config.model.clone(),
            )))
        });
        let system_prompt = self.system_prompt.unwrap_or_else(|| {
            load_system_prompt(self.config.conversation.system_prompt_path.as_deref())
        });
        let prompts = PromptBuilder::new(
            system_prompt,
            TrimPolicy::from_settings(&self.config.conversation),
        );
        let store = Arc::new(ConversationStore::with_clock(clock));
        let orchestrator = InferenceOrchestrator::new(cache.clone(), backend.clone(), store.clone());
        info!(
            backend = backend.name(),
            cache = cache.backend_name(),
            cache_enabled = cache.is_enabled(),
            "service context ready"
        );
        ServiceContext {
            config: self.config,
            cache,
            store,
            orchestrator,
            prompts,
            total_requests: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}
