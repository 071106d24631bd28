//! Per-application worker pool.
//!
//! # Responsibilities
//! - Bound the number of requests one application handles at once
//! - Run each request on its own task so a panic stays inside it
//! - Refuse new work after shutdown and let in-flight work drain
//!
//! # Design Decisions
//! - A semaphore is the bound; a request waits for a permit instead of
//!   being rejected (backpressure, not load shedding)
//! - The permit and the in-flight guard move into the task, so both are
//!   released on every exit path including panics

use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::error::{HostError, HostResult};

/// Bounded executor owned by one application entry.
#[derive(Debug)]
pub struct WorkerPool {
    application: String,
    permits: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a new pool with `capacity` concurrent workers.
    pub fn new(application: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            application: application.into(),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run `work` on the pool, waiting for a free worker first.
    ///
    /// A panic inside `work` comes back as a `Runtime` error.
    pub async fn run<F, T>(&self, work: F) -> HostResult<T>
    where
        F: Future<Output = HostResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| HostError::illegal_state(format!("worker pool of `{}` is shut down", self.application)))?;
        let guard = InFlightGuard::new(Arc::clone(&self.in_flight));

        let task = tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            work.await
        });

        match task.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => {
                let message = panic_message(err.into_panic());
                tracing::error!(application = %self.application, panic = %message, "Worker panicked");
                Err(HostError::runtime(format!("handler panicked: {}", message)))
            }
            Err(err) => Err(HostError::runtime(err)),
        }
    }

    /// Stop accepting work. Requests already running are unaffected.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    /// Check if the pool refuses new work.
    pub fn is_shut_down(&self) -> bool {
        self.permits.is_closed()
    }

    /// Number of requests currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait until no request is running or `timeout` passes.
    /// Returns true when the pool drained.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                tracing::warn!(
                    application = %self.application,
                    in_flight = self.in_flight(),
                    "Drain timeout reached with requests still running"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

/// Decrements the in-flight count when dropped.
#[derive(Debug)]
struct InFlightGuard {
    count: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self { count }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
