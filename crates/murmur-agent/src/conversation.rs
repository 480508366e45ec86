//! In-memory cache of chat sessions, plus per-chat turn exclusion.
//!
//! [`ConversationStore`] knows nothing about persistence or the backend: on
//! a miss the orchestrator rebuilds the session from the message log and
//! puts it back. Idle sessions expire; the log is the source of truth, so an
//! expired session is simply replayed again on the next turn.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::session::ChatSession;

/// Shared handle to one chat's session.
pub type SessionHandle = Arc<Mutex<ChatSession>>;

// ── session cache ────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ConversationStore {
    inner: Cache<i64, SessionHandle>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ConversationStore {
    /// A store whose sessions expire after `idle` without access.
    pub fn new(max_chats: u64, idle: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_chats)
                .time_to_idle(idle)
                .build(),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn get(&self, chat_id: i64) -> Option<SessionHandle> {
        let found = self.inner.get(&chat_id).await;
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!(chat_id, hit = found.is_some(), "session lookup");
        found
    }

    pub async fn set(&self, chat_id: i64, handle: SessionHandle) {
        self.inner.insert(chat_id, handle).await;
    }

    pub async fn invalidate(&self, chat_id: i64) {
        self.inner.invalidate(&chat_id).await;
        debug!(chat_id, "session invalidated");
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(6 * 60 * 60))
    }
}

// ── per-chat locks ───────────────────────────────────────────────────

/// One async mutex per chat. A turn holds its chat's guard from start to
/// finish, so turns for the same chat never interleave.
#[derive(Clone, Default)]
pub struct ChatLocks {
    locks: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(chat_id).or_default().value());
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
