//! Asynchronous completion of a request.
//!
//! # Responsibilities
//! - Let a handler return before the response is produced
//! - Enforce a deadline, run a timeout listener, write a default 500
//! - Cancel pending work when the client connection goes away
//! - Ask the pipeline to re-enter the dispatcher (`dispatch(path)`)
//!
//! # Design Decisions
//! - The state lives in a `watch` channel. Every transition goes through
//!   `send_if_modified`, which runs under the channel's write lock, so a
//!   racing `complete()` and timeout resolve to exactly one winner
//! - The deadline is watched by its own task, spawned with the context, so
//!   it fires even while the handler that started async is still running
//! - Background producers only hold a clone of the context and call
//!   `complete`/`dispatch`
//!
//! # States
//! ```text
//! Started ──complete──▶ Completed
//!    │ ├──dispatch──▶ Dispatching ──▶ Dispatched ──(as Started)
//!    │ ├──deadline──▶ TimingOut ──listener completes──▶ Completed
//!    │ │                  └────────otherwise──────────▶ TimedOut
//!    │ └──connection closed──▶ Cancelled
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use tokio::sync::watch;
use tokio::time;

use crate::error::{HostError, HostResult};
use crate::http::message::CloseSignal;
use crate::http::response::Response;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncState {
    Started,
    /// `dispatch(path)` was called; the pipeline has not picked it up yet.
    Dispatching(String),
    /// The pipeline is running (or has run) the async dispatch.
    Dispatched,
    /// The deadline passed and the timeout listener is running.
    TimingOut,
    Completed,
    TimedOut,
    Cancelled,
}

impl AsyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AsyncState::Completed | AsyncState::TimedOut | AsyncState::Cancelled)
    }

    fn outcome(&self) -> Option<AsyncOutcome> {
        match self {
            AsyncState::Completed => Some(AsyncOutcome::Completed),
            AsyncState::TimedOut => Some(AsyncOutcome::TimedOut),
            AsyncState::Cancelled => Some(AsyncOutcome::Cancelled),
            _ => None,
        }
    }
}

/// Terminal result of an async request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncOutcome {
    Completed,
    TimedOut,
    /// The client disconnected first.
    Cancelled,
}

impl AsyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AsyncOutcome::Completed => "completed",
            AsyncOutcome::TimedOut => "timed_out",
            AsyncOutcome::Cancelled => "cancelled",
        }
    }
}

/// What the pipeline should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AsyncEvent {
    Finished(AsyncOutcome),
    Dispatch(String),
}

type TimeoutListener = Box<dyn FnOnce(&AsyncContext) + Send>;

struct Inner {
    state: watch::Sender<AsyncState>,
    deadline: Mutex<Instant>,
    response: Response,
    timeout_listener: Mutex<Option<TimeoutListener>>,
}

/// Handle to an in-flight async request. Cheap to clone and `Send`, so it
/// can be moved into a background task.
#[derive(Clone)]
pub struct AsyncContext {
    inner: Arc<Inner>,
}

impl fmt::Debug for AsyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncContext")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AsyncContext {
    pub(crate) fn new(response: Response, timeout: Duration) -> Self {
        let (state, _) = watch::channel(AsyncState::Started);
        let ctx = Self {
            inner: Arc::new(Inner {
                state,
                deadline: Mutex::new(Instant::now() + timeout),
                response,
                timeout_listener: Mutex::new(None),
            }),
        };
        ctx.arm_deadline();
        ctx
    }

    fn arm_deadline(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.clone().watch_deadline());
            }
            Err(_) => tracing::debug!("No runtime, async deadline not enforced"),
        }
    }

    /// Fire the timeout once the deadline of a `Started` context passes.
    /// Exits when the context becomes terminal.
    async fn watch_deadline(self) {
        let mut rx = self.inner.state.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            if state.is_terminal() {
                return;
            }

            if state == AsyncState::Started {
                let deadline = time::Instant::from_std(*self.deadline());
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = time::sleep_until(deadline) => {
                        // `restart` may have moved it while we slept.
                        if Instant::now() >= *self.deadline() {
                            self.fire_timeout();
                        }
                    }
                }
            } else if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn deadline(&self) -> MutexGuard<'_, Instant> {
        self.inner.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `next` atomically. `None` from `next` rejects the transition.
    fn transition(
        &self,
        action: &str,
        next: impl FnOnce(&AsyncState) -> Option<AsyncState>,
    ) -> HostResult<()> {
        let mut rejected = None;
        self.inner.state.send_if_modified(|state| match next(state) {
            Some(new_state) => {
                *state = new_state;
                true
            }
            None => {
                rejected = Some(state.clone());
                false
            }
        });
        match rejected {
            None => Ok(()),
            Some(state) => Err(HostError::illegal_state(format!(
                "cannot {} async context in state {:?}",
                action, state
            ))),
        }
    }

    /// Current state.
    pub fn state(&self) -> AsyncState {
        self.inner.state.borrow().clone()
    }

    /// The terminal outcome, once there is one.
    pub fn outcome(&self) -> Option<AsyncOutcome> {
        self.inner.state.borrow().outcome()
    }

    /// Not yet terminal.
    pub fn is_pending(&self) -> bool {
        !self.inner.state.borrow().is_terminal()
    }

    /// Response sink of the request, for background producers.
    pub fn response(&self) -> &Response {
        &self.inner.response
    }

    /// Finish the request. Fails with `IllegalState` once the context is
    /// terminal or while a dispatch is pending.
    pub fn complete(&self) -> HostResult<()> {
        self.transition("complete", |state| match state {
            AsyncState::Started | AsyncState::Dispatched | AsyncState::TimingOut => {
                Some(AsyncState::Completed)
            }
            _ => None,
        })
    }

    /// Re-enter the dispatcher at `path` with dispatch type async.
    pub fn dispatch(&self, path: impl Into<String>) -> HostResult<()> {
        let path = path.into();
        self.transition("dispatch", move |state| match state {
            AsyncState::Started | AsyncState::Dispatched => Some(AsyncState::Dispatching(path)),
            _ => None,
        })
    }

    /// Run `listener` when the deadline passes. It may call `complete()`;
    /// otherwise a 500 is written.
    pub fn on_timeout(&self, listener: impl FnOnce(&AsyncContext) + Send + 'static) {
        *self
            .inner
            .timeout_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(listener));
    }

    /// Wait for a terminal state.
    pub async fn finished(&self) -> AsyncOutcome {
        let mut rx = self.inner.state.subscribe();
        let outcome = match rx.wait_for(AsyncState::is_terminal).await {
            Ok(state) => state.outcome().unwrap_or(AsyncOutcome::Cancelled),
            Err(_) => AsyncOutcome::Cancelled,
        };
        outcome
    }

    /// Start again from an async dispatch with a fresh deadline.
    pub(crate) fn restart(&self, timeout: Duration) -> HostResult<()> {
        self.transition("restart", |state| match state {
            AsyncState::Dispatched => Some(AsyncState::Started),
            _ => None,
        })?;
        *self.deadline() = Instant::now() + timeout;
        Ok(())
    }

    pub(crate) fn mark_dispatched(&self) -> HostResult<()> {
        self.transition("resume", |state| match state {
            AsyncState::Dispatching(_) => Some(AsyncState::Dispatched),
            _ => None,
        })
    }

    /// Cancel after a client disconnect and drop the pending response.
    pub(crate) fn cancel(&self) -> bool {
        let cancelled = self
            .transition("cancel", |state| (!state.is_terminal()).then_some(AsyncState::Cancelled))
            .is_ok();
        if cancelled {
            self.inner.response.discard();
        }
        cancelled
    }

    fn fire_timeout(&self) {
        let started = self.transition("time out", |state| {
            (*state == AsyncState::Started).then_some(AsyncState::TimingOut)
        });
        if started.is_err() {
            return;
        }

        let listener = self
            .inner
            .timeout_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener(self);
        }

        let timed_out = self
            .transition("time out", |state| {
                (*state == AsyncState::TimingOut).then_some(AsyncState::TimedOut)
            })
            .is_ok();
        if timed_out {
            tracing::warn!("Async request timed out without completion");
            if let Err(err) = self
                .inner
                .response
                .close_with_error(StatusCode::INTERNAL_SERVER_ERROR, "Async request timed out")
            {
                tracing::debug!(error = %err, "Could not write timeout response");
            }
        }
    }

    /// Wait until the context is terminal or asks for a dispatch, watching
    /// for a closed connection.
    pub(crate) async fn next_event(&self, closed: &mut CloseSignal) -> AsyncEvent {
        let mut rx = self.inner.state.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                AsyncState::Dispatching(path) => return AsyncEvent::Dispatch(path),
                other => {
                    if let Some(outcome) = other.outcome() {
                        return AsyncEvent::Finished(outcome);
                    }
                }
            }

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return AsyncEvent::Finished(AsyncOutcome::Cancelled);
                    }
                }
                _ = closed.closed() => {
                    if self.cancel() {
                        tracing::debug!("Client disconnected, async request cancelled");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::message::close_signal;

    fn context(timeout: Duration) -> AsyncContext {
        AsyncContext::new(Response::new(), timeout)
    }

    #[test]
    fn complete_once() {
        let ctx = context(Duration::from_secs(5));
        ctx.complete().unwrap();
        assert_eq!(ctx.outcome(), Some(AsyncOutcome::Completed));
        assert!(ctx.complete().unwrap_err().is_illegal_state());
        assert!(ctx.dispatch("/x").unwrap_err().is_illegal_state());
    }

    #[test]
    fn dispatch_then_resume_then_complete() {
        let ctx = context(Duration::from_secs(5));
        ctx.dispatch("/next").unwrap();
        assert_eq!(ctx.state(), AsyncState::Dispatching("/next".into()));
        assert!(ctx.complete().is_err());
        ctx.mark_dispatched().unwrap();
        ctx.complete().unwrap();
        assert!(!ctx.is_pending());
    }

    #[test]
    fn restart_only_after_dispatch() {
        let ctx = context(Duration::from_secs(5));
        assert!(ctx.restart(Duration::from_secs(1)).unwrap_err().is_illegal_state());
        ctx.dispatch("/again").unwrap();
        ctx.mark_dispatched().unwrap();
        ctx.restart(Duration::from_secs(1)).unwrap();
        assert_eq!(ctx.state(), AsyncState::Started);
    }

    #[tokio::test]
    async fn timeout_writes_500_and_rejects_late_complete() {
        let ctx = context(Duration::from_millis(20));
        let mut closed = CloseSignal::never();
        let event = ctx.next_event(&mut closed).await;
        assert_eq!(event, AsyncEvent::Finished(AsyncOutcome::TimedOut));
        assert_eq!(ctx.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(ctx.complete().unwrap_err().is_illegal_state());
    }

    #[tokio::test]
    async fn deadline_fires_without_a_waiter() {
        let ctx = context(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(ctx.outcome(), Some(AsyncOutcome::TimedOut));
        assert!(ctx.response().write_str("late").unwrap_err().is_illegal_state());
        assert_eq!(ctx.finished().await, AsyncOutcome::TimedOut);
    }

    #[tokio::test]
    async fn dispatched_context_does_not_time_out() {
        let ctx = context(Duration::from_millis(10));
        ctx.dispatch("/next").unwrap();
        ctx.mark_dispatched().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(ctx.state(), AsyncState::Dispatched);

        ctx.restart(Duration::from_millis(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(ctx.outcome(), Some(AsyncOutcome::TimedOut));
    }

    #[tokio::test]
    async fn timeout_listener_may_complete() {
        let ctx = context(Duration::from_millis(10));
        ctx.on_timeout(|ctx| {
            ctx.response().write_str("late but fine").unwrap();
            ctx.complete().unwrap();
        });
        let mut closed = CloseSignal::never();
        let event = ctx.next_event(&mut closed).await;
        assert_eq!(event, AsyncEvent::Finished(AsyncOutcome::Completed));
        assert_eq!(ctx.response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn completion_from_another_task() {
        let ctx = context(Duration::from_secs(5));
        let producer = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.response().write_str("done").unwrap();
            producer.complete().unwrap();
        });
        let mut closed = CloseSignal::never();
        assert_eq!(
            ctx.next_event(&mut closed).await,
            AsyncEvent::Finished(AsyncOutcome::Completed)
        );
        assert_eq!(ctx.finished().await, AsyncOutcome::Completed);
    }

    #[tokio::test]
    async fn closed_connection_cancels() {
        let ctx = context(Duration::from_secs(5));
        let (notifier, mut closed) = close_signal();
        drop(notifier);
        assert_eq!(
            ctx.next_event(&mut closed).await,
            AsyncEvent::Finished(AsyncOutcome::Cancelled)
        );
        assert!(ctx.response().is_committed());
        assert!(ctx.complete().unwrap_err().is_illegal_state());
    }

    #[tokio::test]
    async fn racing_complete_and_timeout_have_one_winner() {
        for _ in 0..20 {
            let ctx = context(Duration::from_millis(1));
            let racer = ctx.clone();
            let completer = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                racer.complete().is_ok()
            });
            let mut closed = CloseSignal::never();
            let event = ctx.next_event(&mut closed).await;
            let completed_by_task = completer.await.unwrap();
            match event {
                AsyncEvent::Finished(AsyncOutcome::Completed) => assert!(completed_by_task),
                AsyncEvent::Finished(AsyncOutcome::TimedOut) => assert!(!completed_by_task),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }
}
