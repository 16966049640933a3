//! In-memory session store for the HTTP chat API.
//!
//! Each session sits behind its own async mutex: concurrent submits to one
//! session queue up behind each other, while different sessions never contend
//! beyond the brief map lookup. Sessions nobody has touched for the idle TTL
//! are dropped by a background sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::advisor::session::ConversationSession;

pub type SharedSession = Arc<Mutex<ConversationSession>>;

struct Entry {
    session: SharedSession,
    last_active: Instant,
}

impl Entry {
    fn new(session: ConversationSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            last_active: Instant::now(),
        }
    }
}

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Entry>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh session and returns a snapshot of it.
    pub async fn create(&self) -> ConversationSession {
        let session = ConversationSession::new();
        let snapshot = session.clone();
        self.sessions
            .write()
            .await
            .insert(session.id(), Entry::new(session));
        snapshot
    }

    /// Looks a session up and marks it active.
    pub async fn get(&self, id: Uuid) -> Option<SharedSession> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id)?;
        entry.last_active = Instant::now();
        Some(entry.session.clone())
    }

    /// Returns `true` if the session existed.
    pub async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    /// Drops sessions idle for at least `ttl`. A session whose lock is held
    /// (a submit in flight) is kept. Returns the number evicted.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| {
            now.duration_since(entry.last_active) < ttl || entry.session.try_lock().is_err()
        });
        before - sessions.len()
    }

    /// Runs `evict_idle` periodically until the returned task is aborted.
    pub fn spawn_sweeper(&self, ttl: Duration) -> JoinHandle<()> {
        let store = self.clone();
        let period = (ttl / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let evicted = store.evict_idle(ttl).await;
                if evicted > 0 {
                    info!(evicted, "evicted idle sessions");
                }
            }
        })
    }
}
