use pocketllm_core::backend::{GenerationParams, PlaceholderBackend};
use pocketllm_core::cache::{CacheManager, ManualClock};
use pocketllm_core::config::CacheSettings;
use pocketllm_core::orchestrator::InferenceOrchestrator;
use pocketllm_core::prompt::{build_cache_key, build_prompt};
use pocketllm_core::session::{ConversationStore, MessageRole};
use pocketllm_core::{ChatRequest, Error, Identity, ServiceConfig, ServiceContext};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn quiet_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.model.placeholder_pacing_ms = 0;
    config
}

#[tokio::test]
async fn repeated_infer_is_served_from_cache() {
    let clock = Arc::new(ManualClock::starting_now());
    let cache = Arc::new(CacheManager::in_memory(CacheSettings::default(), clock.clone()));
    let store = Arc::new(ConversationStore::with_clock(clock));
    let backend = Arc::new(PlaceholderBackend::default().with_pacing(Duration::ZERO));
    let orchestrator = InferenceOrchestrator::new(cache, backend, store.clone());

    let sid = store.create_session("u1");
    assert_ok!(store.append_message(&sid, "u1", MessageRole::User, "hello", None));

    let prompt = build_prompt(&[], "You are a helpful AI assistant.", "hello");
    let scope = build_cache_key("u1", &sid, &prompt, None);
    let params = GenerationParams::default();

    let (first, cached) = orchestrator.infer(&scope, &prompt, &params).await;
    assert!(!cached);
    let (second, cached) = orchestrator.infer(&scope, &prompt, &params).await;
    assert!(cached);
    assert_eq!(first, second);
}

#[tokio::test]
async fn non_owner_cannot_delete_a_session() {
    let store = ConversationStore::new();
    let sid = store.create_session("u1");
    let err = assert_err!(store.delete_session(&sid, "u2"));
    assert!(matches!(err, Error::OwnershipViolation { .. }));
    assert!(store.get_session(&sid).is_some());
}

#[tokio::test]
async fn conversation_history_accumulates_in_order() {
    let ctx = ServiceContext::in_memory(quiet_config());
    let alice = Identity::user("alice");

    let first = assert_ok!(ctx.chat(&alice, ChatRequest::new("first question")).await);
    let sid = first.session_id.clone();
    for prompt in ["second question", "third question"] {
        assert_ok!(ctx.chat(&alice, ChatRequest::new(prompt).in_session(&sid)).await);
    }

    let messages = assert_ok!(ctx.session_messages(&alice, &sid));
    assert_eq!(messages.len(), 6);
    let user_turns: Vec<_> = messages
        .iter()
        .filter(|m| m.is_user())
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(user_turns, vec!["first question", "second question", "third question"]);
    assert!(messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(messages.iter().all(|m| m.owner_id == "alice" && m.session_id == sid));
}

#[tokio::test]
async fn sessions_are_isolated_per_owner() {
    let ctx = ServiceContext::in_memory(quiet_config());
    let alice = Identity::user("alice");
    let bob = Identity::user("bob");

    let a1 = assert_ok!(ctx.chat(&alice, ChatRequest::new("a1")).await).session_id;
    let a2 = assert_ok!(ctx.chat(&alice, ChatRequest::new("a2")).await).session_id;
    assert_ok!(ctx.chat(&bob, ChatRequest::new("b1")).await);

    let ids: Vec<_> = ctx.history(&alice).into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![a1.clone(), a2]);
    assert_eq!(ctx.history(&bob).len(), 1);

    assert_ok!(ctx.delete_session(&alice, &a1));
    assert_eq!(ctx.history(&alice).len(), 1);
    assert!(matches!(
        ctx.session_history(&alice, &a1),
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn different_sessions_do_not_share_cache_entries() {
    let ctx = ServiceContext::in_memory(quiet_config());
    let alice = Identity::user("alice");
    let bob = Identity::user("bob");

    let a = assert_ok!(ctx.chat(&alice, ChatRequest::new("same words")).await);
    let b = assert_ok!(ctx.chat(&bob, ChatRequest::new("same words")).await);
    assert!(!a.cached);
    assert!(!b.cached);
    assert_eq!(a.response, b.response);
}

#[tokio::test]
async fn admin_flush_keeps_counters_and_drops_entries() {
    let ctx = ServiceContext::in_memory(quiet_config());
    let admin = Identity::admin("ops");
    assert_ok!(ctx.chat(&Identity::user("u"), ChatRequest::new("q")).await);

    let before = assert_ok!(ctx.cache_stats(&admin).await);
    assert_eq!(before.entry_count, 1);
    assert_eq!(assert_ok!(ctx.flush_cache(&admin).await), 1);
    let after = assert_ok!(ctx.cache_stats(&admin).await);
    assert_eq!(after.entry_count, 0);
    assert_eq!(after.misses, before.misses);
    assert_eq!(after.backend, "in-memory");
}

#[tokio::test]
async fn concurrent_turns_on_different_sessions() {
    let ctx = Arc::new(ServiceContext::in_memory(quiet_config()));
    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let me = Identity::user(format!("user-{i}"));
                let first = ctx.chat(&me, ChatRequest::new("hi")).await?;
                ctx.chat(&me, ChatRequest::new("again").in_session(&first.session_id))
                    .await
            })
        })
        .collect();

    for task in tasks {
        let reply = assert_ok!(task.await.expect("task panicked"));
        assert_eq!(ctx.store().messages(&reply.session_id).len(), 4);
    }
    assert_eq!(ctx.store().session_count(), 16);
}
