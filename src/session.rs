//! In-memory session map with TTL eviction and bounded size. Grounded in
//! `rag/session.py`'s `ConversationContext`/`SessionStore`, reworked from a
//! `threading.Timer`-driven singleton into a `tokio::spawn` background sweep over a
//! single `Mutex`-guarded map, following the async-task idiom in
//! `mira-chat/src/main.rs`'s artifact-maintenance loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::vector_index::Chunk;

const TTL: Duration = Duration::from_secs(1800);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const MAX_SESSIONS: usize = 1000;

/// Per-session conversation state. `last_active` only ever moves forward.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub session_id: String,
    pub current_topic: Option<String>,
    pub current_hotel: Option<String>,
    pub last_chunks: Vec<Chunk>,
    pub last_query: String,
    pub topic_turn_count: u32,
    pub last_active: Instant,
}

impl ConversationContext {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            current_topic: None,
            current_hotel: None,
            last_chunks: Vec::new(),
            last_query: String::new(),
            topic_turn_count: 0,
            last_active: Instant::now(),
        }
    }

    /// Topic update: same topic bumps the turn counter; a new non-null topic replaces
    /// it and resets the counter; `None` preserves the current topic — this is what
    /// lets a short follow-up question inherit the topic of the turn before it.
    pub fn update_topic(&mut self, topic: Option<&str>, hotel: Option<&str>) {
        match topic {
            Some(t) if Some(t) == self.current_topic.as_deref() => {
                self.topic_turn_count += 1;
            }
            Some(t) => {
                self.current_topic = Some(t.to_string());
                self.topic_turn_count = 1;
            }
            None => {}
        }
        if let Some(h) = hotel {
            self.current_hotel = Some(h.to_string());
        }
        self.last_active = Instant::now();
    }

    pub fn cache_chunks(&mut self, chunks: Vec<Chunk>, query: &str) {
        self.last_chunks = chunks;
        self.last_query = query.to_string();
        self.last_active = Instant::now();
    }

    /// Starts a new conversation while keeping the session's TTL slot. Not driven by
    /// any pipeline node — exposed for callers that want to reset topic tracking
    /// without losing the session id.
    pub fn reset(&mut self) {
        self.current_topic = None;
        self.current_hotel = None;
        self.last_chunks.clear();
        self.last_query.clear();
        self.topic_turn_count = 0;
    }
}

struct Inner {
    sessions: HashMap<String, Arc<Mutex<ConversationContext>>>,
}

/// Session store singleton, passed explicitly into the orchestrator rather than
/// reached through a process-wide global.
pub struct SessionStore {
    inner: Mutex<Inner>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        let store = Arc::new(Self {
            inner: Mutex::new(Inner { sessions: HashMap::new() }),
        });
        store.clone().spawn_cleanup_task();
        store
    }

    /// Returns the existing session (bumping `last_active`) or creates a new one,
    /// evicting the oldest entry first if already at `MAX_SESSIONS`.
    pub async fn get_or_create(&self, session_id: Option<String>) -> Arc<Mutex<ConversationContext>> {
        let mut inner = self.inner.lock().await;

        if let Some(id) = &session_id {
            if let Some(ctx) = inner.sessions.get(id) {
                let ctx = ctx.clone();
                ctx.lock().await.last_active = Instant::now();
                return ctx;
            }
        }

        if inner.sessions.len() >= MAX_SESSIONS {
            Self::evict_oldest(&mut inner).await;
        }

        let new_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let ctx = Arc::new(Mutex::new(ConversationContext::new(new_id.clone())));
        inner.sessions.insert(new_id, ctx.clone());
        ctx
    }

    pub async fn reset(&self, session_id: &str) {
        let inner = self.inner.lock().await;
        if let Some(ctx) = inner.sessions.get(session_id) {
            ctx.lock().await.reset();
        }
    }

    pub async fn cleanup(&self) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let mut expired = Vec::new();
        for (id, ctx) in inner.sessions.iter() {
            if now.duration_since(ctx.lock().await.last_active) > TTL {
                expired.push(id.clone());
            }
        }
        let count = expired.len();
        for id in &expired {
            inner.sessions.remove(id);
        }
        if count > 0 {
            tracing::info!(expired = count, remaining = inner.sessions.len(), "session cleanup swept expired sessions");
        }
    }

    async fn evict_oldest(inner: &mut Inner) {
        let mut oldest: Option<(String, Instant)> = None;
        for (id, ctx) in inner.sessions.iter() {
            let last_active = ctx.lock().await.last_active;
            if oldest.as_ref().map(|(_, t)| last_active < *t).unwrap_or(true) {
                oldest = Some((id.clone(), last_active));
            }
        }
        if let Some((id, _)) = oldest {
            inner.sessions.remove(&id);
        }
    }

    fn spawn_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                self.cleanup().await;
            }
        });
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_returns_same_context_for_same_id() {
        let store = SessionStore::new();
        let ctx1 = store.get_or_create(Some("s1".into())).await;
        ctx1.lock().await.update_topic(Some("조식"), Some("josun_palace"));
        let ctx2 = store.get_or_create(Some("s1".into())).await;
        assert_eq!(ctx2.lock().await.current_topic.as_deref(), Some("조식"));
    }

    #[tokio::test]
    async fn test_get_or_create_generates_new_id_when_none() {
        let store = SessionStore::new();
        let ctx = store.get_or_create(None).await;
        assert!(!ctx.lock().await.session_id.is_empty());
    }

    #[tokio::test]
    async fn test_update_topic_preserves_on_none() {
        let mut ctx = ConversationContext::new("s".into());
        ctx.update_topic(Some("객실"), None);
        ctx.update_topic(None, None);
        assert_eq!(ctx.current_topic.as_deref(), Some("객실"));
    }

    #[tokio::test]
    async fn test_update_topic_increments_turn_count_on_repeat() {
        let mut ctx = ConversationContext::new("s".into());
        ctx.update_topic(Some("객실"), None);
        ctx.update_topic(Some("객실"), None);
        assert_eq!(ctx.topic_turn_count, 2);
    }

    #[tokio::test]
    async fn test_reset_clears_topic_but_keeps_session_id() {
        let store = SessionStore::new();
        let ctx = store.get_or_create(Some("s1".into())).await;
        ctx.lock().await.update_topic(Some("조식"), Some("josun_palace"));
        store.reset("s1").await;
        let ctx = store.get_or_create(Some("s1".into())).await;
        let guard = ctx.lock().await;
        assert!(guard.current_topic.is_none());
        assert_eq!(guard.session_id, "s1");
    }

    #[tokio::test]
    async fn test_eviction_at_max_sessions() {
        let store = SessionStore::new();
        for i in 0..MAX_SESSIONS {
            store.get_or_create(Some(format!("s{i}"))).await;
        }
        assert_eq!(store.len().await, MAX_SESSIONS);
        store.get_or_create(Some("overflow".into())).await;
        assert_eq!(store.len().await, MAX_SESSIONS);
    }
}
