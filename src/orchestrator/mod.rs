//! Inference orchestration.
//!
//! Decides between a cached answer and a fresh generation, writes successful
//! generations back to the cache, and multiplexes streamed turns into an
//! ordered event sequence: `start`, tokens, then exactly one of `done` or
//! `error`.

mod stream;

pub use stream::{CancelHandle, ChatStream};

use crate::backend::{clean_response, strip_role_prefix, GenerationParams, TextBackend};
use crate::cache::{CacheKey, CacheManager};
use crate::session::{ConversationStore, MessageRole};
use crate::tokens::word_count;
use crate::types::ChatEvent;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EVENT_BUFFER: usize = 32;

/// One streamed turn: who asked, where the answer goes, and what to run.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub owner_id: String,
    pub session_id: String,
    /// Canonical request text the cache key is derived from.
    pub scope: String,
    /// Fully assembled backend prompt.
    pub prompt: String,
    pub params: GenerationParams,
}

/// Text returned to the caller when generation fails in single-shot mode.
pub fn generation_failure_text(error: &crate::Error) -> String {
    format!("Error generating response: {error}")
}

enum Flow {
    Completed { text: String, cached: bool },
    Failed(String),
    Cancelled,
}

#[derive(Clone)]
pub struct InferenceOrchestrator {
    cache: Arc<CacheManager>,
    backend: Arc<dyn TextBackend>,
    store: Arc<ConversationStore>,
}

impl InferenceOrchestrator {
    pub fn new(
        cache: Arc<CacheManager>,
        backend: Arc<dyn TextBackend>,
        store: Arc<ConversationStore>,
    ) -> Self {
        Self {
            cache,
            backend,
            store,
        }
    }

    pub fn backend(&self) -> &Arc<dyn TextBackend> {
        &self.backend
    }

    fn key(&self, scope: &str, params: &GenerationParams) -> CacheKey {
        self.cache.key_for(scope, params.temperature, params.max_tokens)
    }

    /// Single-shot inference. Returns the reply and whether it came from the
    /// cache.
    ///
    /// A generation failure is returned as text (see
    /// [`generation_failure_text`]) and is never cached; whether it is kept in
    /// the conversation is up to the caller.
    pub async fn infer(&self, scope: &str, prompt: &str, params: &GenerationParams) -> (String, bool) {
        let key = self.key(scope, params);
        if let Some(hit) = self.cache.get(&key).await {
            debug!(key = %key, "serving cached response");
            return (hit, true);
        }

        match self.backend.generate(prompt, params).await {
            Ok(raw) => {
                let text = clean_response(&raw);
                if !text.is_empty() {
                    self.cache.set(&key, &text, None).await;
                }
                (text, false)
            }
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "generation failed");
                (generation_failure_text(&e), false)
            }
        }
    }

    /// Streamed inference on a spawned task.
    ///
    /// On success the reply is appended to the session as an assistant message
    /// under the id announced in `start`, then cached (live path only), before
    /// `done` is sent. Cancellation, a generation failure or a failed append
    /// commits nothing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn stream(&self, turn: TurnRequest) -> (ChatStream, CancelHandle) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let token = CancellationToken::new();
        let handle = CancelHandle::new(token.clone());
        let stream = ChatStream::new(rx, token.clone());

        let this = self.clone();
        tokio::spawn(async move { this.drive(turn, tx, token).await });
        (stream, handle)
    }

    async fn drive(self, turn: TurnRequest, tx: mpsc::Sender<ChatEvent>, cancel: CancellationToken) {
        let message_id = Uuid::new_v4().to_string();
        let start = ChatEvent::Start {
            session_id: turn.session_id.clone(),
            message_id: message_id.clone(),
        };
        if !emit(&tx, &cancel, start).await {
            return;
        }

        let key = self.key(&turn.scope, &turn.params);
        let flow = match self.cache.get(&key).await {
            Some(hit) => replay(hit, &tx, &cancel).await,
            None => self.generate_live(&turn, &tx, &cancel).await,
        };

        match flow {
            Flow::Completed { text, cached } => {
                self.finish(&turn, message_id, text, cached, &tx, &cancel)
                    .await
            }
            Flow::Failed(message) => {
                let _ = emit(&tx, &cancel, ChatEvent::error(message)).await;
            }
            Flow::Cancelled => {
                debug!(session_id = %turn.session_id, "stream cancelled, nothing committed");
            }
        }
    }

    async fn generate_live(
        &self,
        turn: &TurnRequest,
        tx: &mpsc::Sender<ChatEvent>,
        cancel: &CancellationToken,
    ) -> Flow {
        let mut fragments = match self.backend.generate_stream(&turn.prompt, &turn.params).await {
            Ok(s) => s,
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "stream generation failed to start");
                return Flow::Failed(generation_failure_text(&e));
            }
        };

        let mut text = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Flow::Cancelled,
                next = fragments.next() => next,
            };
            let fragment = match next {
                None => break,
                Some(Ok(fragment)) => fragment,
                Some(Err(e)) => {
                    warn!(backend = self.backend.name(), error = %e, "generation failed mid-stream");
                    return Flow::Failed(generation_failure_text(&e));
                }
            };
            let fragment = if text.is_empty() {
                strip_role_prefix(&fragment).to_string()
            } else {
                fragment
            };
            if fragment.is_empty() {
                continue;
            }
            text.push_str(&fragment);
            if !emit(tx, cancel, ChatEvent::token(fragment)).await {
                return Flow::Cancelled;
            }
            tokio::task::yield_now().await;
        }
        drop(fragments);

        if cancel.is_cancelled() {
            return Flow::Cancelled;
        }
        // Committed in the same form `infer` produces.
        text.truncate(text.trim_end().len());
        Flow::Completed {
            text,
            cached: false,
        }
    }

    async fn finish(
        &self,
        turn: &TurnRequest,
        message_id: String,
        text: String,
        cached: bool,
        tx: &mpsc::Sender<ChatEvent>,
        cancel: &CancellationToken,
    ) {
        if cancel.is_cancelled() {
            debug!(session_id = %turn.session_id, "stream cancelled before commit");
            return;
        }
        let tokens_used = word_count(&text);
        let appended = self.store.append_message_with_id(
            &turn.session_id,
            &turn.owner_id,
            message_id,
            MessageRole::Assistant,
            &text,
            Some(tokens_used),
        );
        let event = match appended {
            Ok(_) => {
                if !cached && !text.is_empty() {
                    let key = self.key(&turn.scope, &turn.params);
                    self.cache.set(&key, &text, None).await;
                }
                info!(session_id = %turn.session_id, tokens_used, cached, "stream completed");
                ChatEvent::Done {
                    tokens_used,
                    cached,
                    timestamp: Utc::now(),
                }
            }
            Err(e) => {
                warn!(session_id = %turn.session_id, error = %e, "could not store streamed reply");
                ChatEvent::error(e.to_string())
            }
        };
        let _ = emit(tx, cancel, event).await;
    }
}

/// Replay a cached reply word by word.
async fn replay(text: String, tx: &mpsc::Sender<ChatEvent>, cancel: &CancellationToken) -> Flow {
    for (i, word) in text.split_whitespace().enumerate() {
        let content = if i == 0 {
            word.to_string()
        } else {
            format!(" {word}")
        };
        if !emit(tx, cancel, ChatEvent::token(content)).await {
            return Flow::Cancelled;
        }
        tokio::task::yield_now().await;
    }
    Flow::Completed { text, cached: true }
}

/// Send one event. `false` when the turn was cancelled or the receiver is gone.
async fn emit(tx: &mpsc::Sender<ChatEvent>, cancel: &CancellationToken, event: ChatEvent) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ModelInfo, PlaceholderBackend};
    use crate::cache::ManualClock;
    use crate::config::{CacheSettings, ModelSettings};
    use crate::prompt::build_prompt;
    use crate::{BoxStream, Error, ErrorContext, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted backend: streams fixed fragments, optionally failing after them
    /// or hanging forever.
    struct Scripted {
        fragments: Vec<&'static str>,
        fail_after: bool,
        hang_after: bool,
        calls: AtomicUsize,
        dropped: Arc<AtomicBool>,
    }

    impl Scripted {
        fn new(fragments: Vec<&'static str>) -> Self {
            Self {
                fragments,
                fail_after: false,
                hang_after: false,
                calls: AtomicUsize::new(0),
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl TextBackend for Scripted {
        async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_after {
                return Err(Error::generation_with_context("boom", ErrorContext::new()));
            }
            Ok(self.fragments.concat())
        }

        async fn generate_stream(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> Result<BoxStream<'static, String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let items: Vec<Result<String>> = self.fragments.iter().map(|f| Ok(f.to_string())).collect();
            let head = futures::stream::iter(items);
            let flag = DropFlag(self.dropped.clone());
            let tail: BoxStream<'static, String> = if self.fail_after {
                Box::pin(futures::stream::iter(vec![Err::<String, Error>(
                    Error::generation_with_context("boom", ErrorContext::new()),
                )]))
            } else if self.hang_after {
                Box::pin(futures::stream::pending::<Result<String>>())
            } else {
                Box::pin(futures::stream::empty::<Result<String>>())
            };
            Ok(Box::pin(head.chain(tail).map(move |item| {
                let _keep = &flag;
                item
            })))
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo::from_settings(&ModelSettings::default(), true, "scripted")
        }

        fn is_loaded(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    struct Fixture {
        orchestrator: InferenceOrchestrator,
        cache: Arc<CacheManager>,
        store: Arc<ConversationStore>,
        session_id: String,
    }

    fn fixture(backend: Arc<dyn TextBackend>, cache_enabled: bool) -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let settings = CacheSettings {
            enabled: cache_enabled,
            ..CacheSettings::default()
        };
        let cache = Arc::new(CacheManager::in_memory(settings, clock.clone()));
        let store = Arc::new(ConversationStore::with_clock(clock));
        let session_id = store.create_session("u1");
        Fixture {
            orchestrator: InferenceOrchestrator::new(cache.clone(), backend, store.clone()),
            cache,
            store,
            session_id,
        }
    }

    fn turn(fx: &Fixture, text: &str) -> TurnRequest {
        TurnRequest {
            owner_id: "u1".into(),
            session_id: fx.session_id.clone(),
            scope: format!("scope:{text}"),
            prompt: build_prompt(&[], "sys", text),
            params: GenerationParams::default(),
        }
    }

    async fn collect(stream: ChatStream) -> Vec<ChatEvent> {
        stream.collect().await
    }

    fn tokens(events: &[ChatEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::Token { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    fn placeholder() -> Arc<dyn TextBackend> {
        Arc::new(PlaceholderBackend::default().with_pacing(Duration::ZERO))
    }

    #[tokio::test]
    async fn infer_caches_after_first_generation() {
        let backend = Arc::new(Scripted::new(vec!["AI: ", "Hello", " world"]));
        let fx = fixture(backend.clone(), true);
        let params = GenerationParams::default();

        let (first, cached) = fx.orchestrator.infer("k", "p", &params).await;
        assert_eq!((first.as_str(), cached), ("Hello world", false));
        let (second, cached) = fx.orchestrator.infer("k", "p", &params).await;
        assert_eq!((second.as_str(), cached), ("Hello world", true));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        let stats = fx.cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn infer_failure_is_text_and_not_cached() {
        let mut scripted = Scripted::new(vec![]);
        scripted.fail_after = true;
        let fx = fixture(Arc::new(scripted), true);
        let params = GenerationParams::default();

        let (text, cached) = fx.orchestrator.infer("k", "p", &params).await;
        assert!(text.starts_with("Error generating response:"));
        assert!(!cached);
        let (_, cached) = fx.orchestrator.infer("k", "p", &params).await;
        assert!(!cached);
        assert_eq!(fx.cache.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn live_stream_matches_single_shot() {
        let fx = fixture(placeholder(), false);
        let request = turn(&fx, "tell me something");

        let (single, _) = fx
            .orchestrator
            .infer(&request.scope, &request.prompt, &request.params)
            .await;
        let (stream, _handle) = fx.orchestrator.stream(request);
        let events = collect(stream).await;

        assert_eq!(tokens(&events), single);
        assert!(matches!(events.first(), Some(ChatEvent::Start { .. })));
        assert!(matches!(events.last(), Some(ChatEvent::Done { cached: false, .. })));
    }

    #[tokio::test]
    async fn second_stream_replays_from_cache() {
        let fx = fixture(placeholder(), true);

        let first = collect(fx.orchestrator.stream(turn(&fx, "hi")).0).await;
        let second = collect(fx.orchestrator.stream(turn(&fx, "hi")).0).await;

        assert_eq!(tokens(&first), tokens(&second));
        match second.last() {
            Some(ChatEvent::Done {
                tokens_used, cached, ..
            }) => {
                assert!(*cached);
                assert_eq!(*tokens_used, word_count(&tokens(&second)));
            }
            other => panic!("expected done, got {other:?}"),
        }

        let messages = fx.store.messages(&fx.session_id);
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.is_assistant()));
        assert_eq!(messages[1].content, tokens(&second));
    }

    #[tokio::test]
    async fn mid_stream_failure_commits_nothing() {
        let mut scripted = Scripted::new(vec!["partial", " text"]);
        scripted.fail_after = true;
        let fx = fixture(Arc::new(scripted), true);

        let events = collect(fx.orchestrator.stream(turn(&fx, "q")).0).await;
        let kinds: Vec<_> = events.iter().map(ChatEvent::kind).collect();
        assert_eq!(kinds, vec!["start", "token", "token", "error"]);

        assert!(fx.store.messages(&fx.session_id).is_empty());
        assert_eq!(fx.cache.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn first_fragment_is_cleaned_and_empty_fragments_skipped() {
        let fx = fixture(Arc::new(Scripted::new(vec!["Assistant: ", "", "Hi", "", " there"])), true);
        let events = collect(fx.orchestrator.stream(turn(&fx, "q")).0).await;
        let contents: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::Token { content } => Some(content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(contents, vec!["Hi", " there"]);
    }

    #[tokio::test]
    async fn cancel_stops_live_generation_without_commit() {
        let mut scripted = Scripted::new(vec!["one", " two"]);
        scripted.hang_after = true;
        let scripted = Arc::new(scripted);
        let dropped = scripted.dropped.clone();
        let fx = fixture(scripted, true);

        let (mut stream, handle) = fx.orchestrator.stream(turn(&fx, "q"));
        assert!(matches!(stream.next().await, Some(ChatEvent::Start { .. })));
        assert_eq!(stream.next().await, Some(ChatEvent::token("one")));
        assert_eq!(stream.next().await, Some(ChatEvent::token(" two")));

        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(stream.next().await, None);

        assert!(dropped.load(Ordering::SeqCst));
        assert!(fx.store.messages(&fx.session_id).is_empty());
        assert_eq!(fx.cache.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn dropping_the_stream_releases_the_backend() {
        let mut scripted = Scripted::new(vec!["one"]);
        scripted.hang_after = true;
        let scripted = Arc::new(scripted);
        let dropped = scripted.dropped.clone();
        let fx = fixture(scripted, true);

        let (mut stream, _handle) = fx.orchestrator.stream(turn(&fx, "q"));
        stream.next().await;
        stream.next().await;
        drop(stream);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("backend stream was not released");
        assert!(fx.store.messages(&fx.session_id).is_empty());
        assert_eq!(fx.cache.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn deleted_session_turns_done_into_error() {
        let fx = fixture(placeholder(), true);
        let request = turn(&fx, "q");
        fx.store.delete_session(&fx.session_id, "u1").unwrap();

        let events = collect(fx.orchestrator.stream(request).0).await;
        assert!(matches!(events.last(), Some(ChatEvent::Error { .. })));
        assert_eq!(fx.cache.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn streamed_reply_is_cached_in_single_shot_form() {
        let fragments = vec!["Hi", " there", " \n"];
        let fresh = fixture(Arc::new(Scripted::new(fragments.clone())), true);
        let request = turn(&fresh, "q");
        let (expected, _) = fresh
            .orchestrator
            .infer(&request.scope, &request.prompt, &request.params)
            .await;
        assert_eq!(expected, "Hi there");

        let fx = fixture(Arc::new(Scripted::new(fragments)), true);
        let request = turn(&fx, "q");
        let events = collect(fx.orchestrator.stream(request.clone()).0).await;
        assert_eq!(tokens(&events), "Hi there \n");

        let (text, cached) = fx
            .orchestrator
            .infer(&request.scope, &request.prompt, &request.params)
            .await;
        assert!(cached);
        assert_eq!(text, expected);
        assert_eq!(fx.store.messages(&fx.session_id)[0].content, expected);
    }

    #[tokio::test]
    async fn start_announces_the_stored_message_id() {
        let fx = fixture(placeholder(), true);
        let events = collect(fx.orchestrator.stream(turn(&fx, "q")).0).await;

        let announced = match &events[0] {
            ChatEvent::Start { message_id, .. } => message_id.clone(),
            other => panic!("expected start, got {other:?}"),
        };
        let stored = fx.store.messages(&fx.session_id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, announced);
    }
}
