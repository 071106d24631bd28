//! Per-application session store.
//!
//! # Responsibilities
//! - Map session ids to live sessions
//! - Create a session for an unknown id without racing concurrent creators
//! - Evict expired or invalidated sessions lazily and from a background sweep
//!
//! # Design Decisions
//! - `Arc<DashMap>` so the store is cheap to clone into the sweeper task
//! - Creation goes through the entry API: two requests with the same new
//!   id observe the same session, and only one of them sees `created`

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time;

use crate::observability::metrics;
use crate::session::Session;

/// Thread-safe map of session id to session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<DashMap<String, Arc<Session>>>,
    max_idle: Option<Duration>,
    application: Arc<str>,
}

impl SessionStore {
    /// Create an empty store for `application`. New sessions inherit `max_idle`.
    pub fn new(application: &str, max_idle: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            max_idle,
            application: Arc::from(application),
        }
    }

    /// Idle limit given to new sessions.
    pub fn max_idle(&self) -> Option<Duration> {
        self.max_idle
    }

    /// Look up a live session and mark it accessed.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let now = Instant::now();
        if self
            .inner
            .remove_if(id, |_, s| !s.is_valid() || s.is_expired(now))
            .is_some()
        {
            tracing::debug!(session_id = %id, "Evicted stale session on lookup");
            return None;
        }
        let session = self.inner.get(id).map(|e| Arc::clone(e.value()))?;
        session.touch();
        Some(session)
    }

    /// Return the session for `id`, creating it if absent or stale.
    ///
    /// The flag is true only for the caller that created the session.
    pub fn get_or_create(&self, id: &str) -> (Arc<Session>, bool) {
        let now = Instant::now();
        // The entry guard holds a shard lock; nothing below may touch the map.
        let result = match self.inner.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if current.is_valid() && !current.is_expired(now) {
                    let session = Arc::clone(current);
                    session.touch();
                    return (session, false);
                }
                let fresh = Arc::new(Session::new(id, self.max_idle));
                entry.insert(Arc::clone(&fresh));
                (fresh, true)
            }
            Entry::Vacant(entry) => {
                let fresh = Arc::new(Session::new(id, self.max_idle));
                entry.insert(Arc::clone(&fresh));
                (fresh, true)
            }
        };
        metrics::record_sessions_active(&self.application, self.inner.len());
        result
    }

    /// Invalidate and remove a session. Returns whether it existed.
    pub fn invalidate(&self, id: &str) -> bool {
        match self.inner.remove(id) {
            Some((_, session)) => {
                session.invalidate();
                true
            }
            None => false,
        }
    }

    /// Remove every expired or invalidated session. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, s| s.is_valid() && !s.is_expired(now));
        let removed = before.saturating_sub(self.inner.len());
        metrics::record_sessions_active(&self.application, self.inner.len());
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Invalidate and drop every session.
    pub fn clear(&self) {
        for entry in self.inner.iter() {
            entry.value().invalidate();
        }
        self.inner.clear();
        metrics::record_sessions_active(&self.application, 0);
    }

    /// Periodically purge expired sessions until shutdown.
    pub async fn run_sweeper(self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::debug!(application = %self.application, interval_secs = interval.as_secs(), "Session sweeper starting");

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.purge_expired();
                    if removed > 0 {
                        tracing::debug!(application = %self.application, removed, remaining = self.len(), "Purged expired sessions");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Session sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
