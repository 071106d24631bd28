//! A single server-side session.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Server-side state keyed by a session id.
///
/// Shared between concurrent requests carrying the same id, so every
/// field is interior-mutable.
pub struct Session {
    id: String,
    created: Instant,
    last_access: Mutex<Instant>,
    max_idle: Mutex<Option<Duration>>,
    fresh: AtomicBool,
    valid: AtomicBool,
    attributes: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("new", &self.is_new())
            .field("valid", &self.is_valid())
            .field("attributes", &self.attributes.len())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(id: impl Into<String>, max_idle: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            created: now,
            last_access: Mutex::new(now),
            max_idle: Mutex::new(max_idle),
            fresh: AtomicBool::new(true),
            valid: AtomicBool::new(true),
            attributes: DashMap::new(),
        }
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the session was created.
    pub fn created(&self) -> Instant {
        self.created
    }

    /// When the session was last looked up.
    pub fn last_accessed(&self) -> Instant {
        *self.last_access.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True until a later request joins this session.
    pub fn is_new(&self) -> bool {
        self.fresh.load(Ordering::Acquire)
    }

    /// Check if the session has not been invalidated.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Mark the session dead and drop its attributes. The store evicts it
    /// on the next lookup.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
        self.attributes.clear();
    }

    /// Get a typed attribute. `None` if absent or of another type.
    pub fn attribute<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let value = self.attributes.get(name)?;
        Arc::clone(value.value()).downcast::<T>().ok()
    }

    /// Store an attribute, replacing any previous value.
    pub fn set_attribute<T: Any + Send + Sync>(&self, name: impl Into<String>, value: T) {
        self.attributes.insert(name.into(), Arc::new(value));
    }

    /// Remove an attribute. Returns whether it was set.
    pub fn remove_attribute(&self, name: &str) -> bool {
        self.attributes.remove(name).is_some()
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.iter().map(|e| e.key().clone()).collect()
    }

    /// Idle time after which the session expires. `None` never expires.
    pub fn max_inactive_interval(&self) -> Option<Duration> {
        *self.max_idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the idle limit; `None` disables expiry.
    pub fn set_max_inactive_interval(&self, max_idle: Option<Duration>) {
        *self.max_idle.lock().unwrap_or_else(PoisonError::into_inner) = max_idle;
    }

    pub(crate) fn touch(&self) {
        self.fresh.store(false, Ordering::Release);
        *self.last_access.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        match self.max_inactive_interval() {
            Some(max_idle) => now.saturating_duration_since(self.last_accessed()) > max_idle,
            None => false,
        }
    }
}
