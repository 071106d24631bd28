//! One deployed application.
//!
//! # Responsibilities
//! - Own the isolated state of a unit: handler tables, session store,
//!   worker pool, resource root
//! - Run handler/filter `init` and `destroy` hooks
//! - Drive one request through dispatch, async completion, session cookie
//!   emission and flush
//!
//! # Data Flow
//! ```text
//! InboundMessage
//!     → WorkerPool::run (bounded, panic-isolated task)
//!     → Request + Response
//!     → Dispatcher::dispatch
//!     → [AsyncContext: wait / re-dispatch / time out / cancel]
//!     → Set-Cookie for a new session
//!     → Response::flush → OutboundMessage
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;

use crate::application::static_files::StaticResourceHandler;
use crate::application::unit::DeploymentUnit;
use crate::application::WorkerPool;
use crate::config::AppSettings;
use crate::dispatch::async_context::{AsyncEvent, AsyncOutcome, AsyncState};
use crate::dispatch::dispatcher::normalize_target;
use crate::dispatch::{
    AsyncContext, DispatchOutcome, DispatchType, Dispatcher, FilterRegistration, HandlerRegistration,
    UnitConfig, UrlPattern,
};
use crate::error::{HostError, HostResult};
use crate::http::cookie::session_cookie;
use crate::http::message::{CloseSignal, InboundMessage, OutboundMessage};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::session::SessionStore;

/// Name of the handler registered for `resource_root` when a unit has no default.
pub const DEFAULT_RESOURCE_HANDLER: &str = "default-resources";

/// A loaded application, addressed by its mount key.
pub struct Application {
    name: String,
    mount: String,
    settings: AppSettings,
    resource_root: Option<PathBuf>,
    dispatcher: Dispatcher,
    sessions: SessionStore,
    pool: WorkerPool,
    shutdown: Shutdown,
    initialized: AtomicBool,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("mount", &self.mount)
            .field("handlers", &self.dispatcher.handlers().len())
            .field("filters", &self.dispatcher.filters().len())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl Application {
    /// Build the handler tables of `unit`. No hooks run until [`Application::init`].
    pub fn new(unit: DeploymentUnit, settings: AppSettings) -> HostResult<Self> {
        let mount = unit.mount_key();
        let name = unit.name.clone();
        let mut dispatcher = Dispatcher::new(name.clone());

        let unit_config = |entry: &str, init_params| UnitConfig {
            name: entry.to_string(),
            application: name.clone(),
            init_params,
            resource_root: unit.resource_root.clone(),
        };

        for definition in &unit.handlers {
            dispatcher.add_handler(HandlerRegistration {
                name: definition.name.clone(),
                patterns: parse_patterns(&name, &definition.url_patterns)?,
                handler: Arc::clone(&definition.handler),
                config: unit_config(&definition.name, definition.init_params.clone()),
            })?;
        }

        if settings.dispatch.register_default_handler
            && unit.resource_root.is_some()
            && !dispatcher.has_default()
        {
            dispatcher.add_handler(HandlerRegistration {
                name: DEFAULT_RESOURCE_HANDLER.to_string(),
                patterns: vec![UrlPattern::Default],
                handler: Arc::new(StaticResourceHandler::new()),
                config: unit_config(DEFAULT_RESOURCE_HANDLER, Default::default()),
            })?;
        }

        for definition in &unit.filters {
            dispatcher.add_filter(FilterRegistration {
                name: definition.name.clone(),
                patterns: parse_patterns(&name, &definition.url_patterns)?,
                handler_names: definition.handler_names.clone(),
                dispatch_types: definition.dispatch_types.clone(),
                filter: Arc::clone(&definition.filter),
                config: unit_config(&definition.name, definition.init_params.clone()),
            });
        }

        Ok(Self {
            sessions: SessionStore::new(&name, settings.session.max_idle()),
            pool: WorkerPool::new(name.clone(), settings.pool.workers_per_application),
            shutdown: Shutdown::new(),
            initialized: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            resource_root: unit.resource_root.clone(),
            dispatcher,
            settings,
            mount,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mount key; `""` for the root application.
    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Settings this application was loaded with.
    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn resource_root(&self) -> Option<&Path> {
        self.resource_root.as_deref()
    }

    /// Get the dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Get the session store.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Get the worker pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Check if every init hook has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Run every `init` hook in registration order, handlers first.
    ///
    /// On failure the hooks that already ran are undone with `destroy`
    /// and a `Lifecycle` error is returned.
    pub fn init(&self) -> HostResult<()> {
        let handlers = self.dispatcher.handlers();
        let filters = self.dispatcher.filters();

        for (i, registration) in handlers.iter().enumerate() {
            if let Err(err) = registration.handler.init(&registration.config) {
                self.rollback(&handlers[..i], &[]);
                return Err(self.init_failure("handler", &registration.name, err));
            }
        }
        for (i, registration) in filters.iter().enumerate() {
            if let Err(err) = registration.filter.init(&registration.config) {
                self.rollback(handlers, &filters[..i]);
                return Err(self.init_failure("filter", &registration.name, err));
            }
        }

        self.initialized.store(true, Ordering::Release);
        tracing::debug!(
            application = %self.name,
            handlers = handlers.len(),
            filters = filters.len(),
            "Application initialized"
        );
        Ok(())
    }

    fn init_failure(&self, what: &str, name: &str, err: HostError) -> HostError {
        tracing::error!(application = %self.name, error = %err, "{} `{}` failed to initialize", what, name);
        match err {
            HostError::Lifecycle { .. } => err,
            other => HostError::lifecycle(&self.name, format!("{} `{}` failed to initialize: {}", what, name, other)),
        }
    }

    fn rollback(&self, handlers: &[Arc<HandlerRegistration>], filters: &[Arc<FilterRegistration>]) {
        for registration in filters.iter().rev() {
            self.destroy_one("filter", &registration.name, || registration.filter.destroy());
        }
        for registration in handlers.iter().rev() {
            self.destroy_one("handler", &registration.name, || registration.handler.destroy());
        }
    }

    fn destroy_one(&self, what: &str, name: &str, destroy: impl FnOnce()) {
        if panic::catch_unwind(AssertUnwindSafe(destroy)).is_err() {
            tracing::warn!(application = %self.name, "{} `{}` panicked in destroy, continuing", what, name);
        }
    }

    /// Run every `destroy` hook once. A failing hook does not stop the rest.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) || !self.initialized.load(Ordering::Acquire) {
            return;
        }
        self.rollback(self.dispatcher.handlers(), self.dispatcher.filters());
    }

    /// Start the background session sweep, if configured and a runtime is running.
    pub fn start_sweeper(&self) {
        let interval = self.settings.session.sweep_interval_secs;
        if interval == 0 || self.sessions.max_idle().is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(
                    self.sessions
                        .clone()
                        .run_sweeper(Duration::from_secs(interval), self.shutdown.subscribe()),
                );
            }
            Err(_) => tracing::debug!(application = %self.name, "No runtime, session sweep disabled"),
        }
    }

    /// Stop taking requests, drain, run destroy hooks and drop all sessions.
    pub async fn unload(&self) {
        self.pool.shutdown();
        let drain_timeout = Duration::from_secs(self.settings.pool.drain_timeout_secs);
        self.pool.drain(drain_timeout).await;
        self.destroy();
        self.sessions.clear();
        self.shutdown.trigger();
        tracing::info!(application = %self.name, mount = %self.mount, "Application unloaded");
    }

    /// Handle one request on this application's worker pool.
    ///
    /// Only a client disconnect is reported as an error; every other
    /// failure becomes an error response.
    pub async fn serve(self: Arc<Self>, message: InboundMessage) -> HostResult<OutboundMessage> {
        let started = Instant::now();
        let app = Arc::clone(&self);
        match self.pool.run(app.process(message)).await {
            Ok(out) => {
                metrics::record_request(&self.name, out.status.as_u16(), started);
                Ok(out)
            }
            Err(HostError::ClientDisconnected) => {
                tracing::debug!(application = %self.name, "Client disconnected before completion");
                Err(HostError::ClientDisconnected)
            }
            Err(err) => {
                let status = if self.pool.is_shut_down() {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    tracing::error!(application = %self.name, error = %err, "Request failed outside the dispatcher");
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                metrics::record_request(&self.name, status.as_u16(), started);
                Ok(OutboundMessage::status(status))
            }
        }
    }

    async fn process(self: Arc<Self>, message: InboundMessage) -> HostResult<OutboundMessage> {
        let mut closed = message.closed.clone();
        let mut request = Request::new(message, Arc::clone(&self));
        let response = Response::new();

        let outcome = self.dispatcher.dispatch(&mut request, &response).await;
        if let Some(ctx) = request.async_context().cloned() {
            if matches!(outcome, DispatchOutcome::Handled) {
                self.await_async(&mut request, &response, &ctx, &mut closed).await?;
            } else {
                finish_failed(&ctx);
            }
        }

        self.add_session_cookie(&request, &response);
        response.flush()
    }

    async fn await_async(
        &self,
        request: &mut Request,
        response: &Response,
        ctx: &AsyncContext,
        closed: &mut CloseSignal,
    ) -> HostResult<()> {
        loop {
            match ctx.next_event(closed).await {
                AsyncEvent::Finished(outcome) => {
                    metrics::record_async_outcome(&self.name, outcome);
                    return match outcome {
                        AsyncOutcome::Cancelled => Err(HostError::ClientDisconnected),
                        AsyncOutcome::Completed | AsyncOutcome::TimedOut => Ok(()),
                    };
                }
                AsyncEvent::Dispatch(path) => {
                    ctx.mark_dispatched()?;
                    request.set_dispatch_type(DispatchType::Async);
                    request.replace_dispatch_path(Some(normalize_target(&path)));

                    let outcome = self.dispatcher.dispatch(request, response).await;
                    if !matches!(outcome, DispatchOutcome::Handled) {
                        finish_failed(ctx);
                    } else if ctx.state() == AsyncState::Dispatched && ctx.complete().is_err() {
                        // A producer finished it first; the next event reports that.
                        tracing::trace!(application = %self.name, "Implicit async completion lost the race");
                    }
                }
            }
        }
    }

    fn add_session_cookie(&self, request: &Request, response: &Response) {
        if !request.session_created() || request.is_requested_session_id_from_cookie() {
            return;
        }
        let config = &self.settings.session;
        let path = if self.mount.is_empty() { "/" } else { self.mount.as_str() };
        let cookie = session_cookie(&config.cookie_name, request.requested_session_id(), path, config.max_age());
        if let Err(err) = response.add_cookie(&cookie) {
            tracing::debug!(application = %self.name, error = %err, "Could not attach session cookie");
        }
    }
}

/// After a failed dispatch the error response is already written; end the
/// async context so it is flushed now.
fn finish_failed(ctx: &AsyncContext) {
    if ctx.is_pending() && ctx.complete().is_err() {
        tracing::debug!(state = ?ctx.state(), "Async context could not be completed after failure");
    }
}

fn parse_patterns(unit: &str, patterns: &[String]) -> HostResult<Vec<UrlPattern>> {
    patterns
        .iter()
        .map(|p| UrlPattern::parse(p).map_err(|err| HostError::lifecycle(unit, err.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Handler;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
        fail_init: bool,
        panic_destroy: bool,
        tag: &'static str,
    }

    #[async_trait]
    impl Handler for Recorder {
        fn init(&self, _config: &UnitConfig) -> HostResult<()> {
            self.events.lock().unwrap().push(format!("init {}", self.tag));
            if self.fail_init {
                return Err(HostError::runtime("nope"));
            }
            Ok(())
        }

        async fn handle(&self, _request: &mut Request, response: &Response) -> HostResult<()> {
            response.write_str(self.tag)
        }

        fn destroy(&self) {
            self.events.lock().unwrap().push(format!("destroy {}", self.tag));
            if self.panic_destroy {
                panic!("destroy failed");
            }
        }
    }

    fn recorder(events: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Recorder {
        Recorder {
            events: Arc::clone(events),
            tag,
            ..Recorder::default()
        }
    }

    #[test]
    fn init_failure_rolls_back_and_reports_lifecycle() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let unit = DeploymentUnit::new("app")
            .handler("a", recorder(&events, "a"), &["/a"])
            .handler("b", Recorder { fail_init: true, ..recorder(&events, "b") }, &["/b"]);
        let app = Application::new(unit, AppSettings::default()).unwrap();

        let err = app.init().unwrap_err();
        assert!(matches!(err, HostError::Lifecycle { .. }));
        assert!(!app.is_initialized());
        assert_eq!(*events.lock().unwrap(), vec!["init a", "init b", "destroy a"]);
    }

    #[test]
    fn destroy_is_best_effort_and_runs_once() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let unit = DeploymentUnit::new("app")
            .handler("a", recorder(&events, "a"), &["/a"])
            .handler("b", Recorder { panic_destroy: true, ..recorder(&events, "b") }, &["/b"])
            .handler("c", recorder(&events, "c"), &["/c"]);
        let app = Application::new(unit, AppSettings::default()).unwrap();
        app.init().unwrap();
        app.destroy();
        app.destroy();

        let events = events.lock().unwrap();
        let destroys: Vec<_> = events.iter().filter(|e| e.starts_with("destroy")).collect();
        assert_eq!(destroys, vec!["destroy c", "destroy b", "destroy a"]);
    }

    #[test]
    fn invalid_pattern_fails_construction() {
        let unit = DeploymentUnit::new("app").handler("a", Recorder::default(), &["nope"]);
        assert!(matches!(
            Application::new(unit, AppSettings::default()),
            Err(HostError::Lifecycle { .. })
        ));
    }

    #[test]
    fn resource_root_registers_default_handler() {
        let unit = DeploymentUnit::new("site").resource_root("/srv/site");
        let app = Application::new(unit, AppSettings::default()).unwrap();
        assert_eq!(
            app.dispatcher().resolve("/anything").map(|h| h.name.as_str()),
            Some(DEFAULT_RESOURCE_HANDLER)
        );
    }

    #[tokio::test]
    async fn serve_writes_session_cookie_for_new_sessions() {
        struct CreatesSession;

        #[async_trait]
        impl Handler for CreatesSession {
            async fn handle(&self, request: &mut Request, response: &Response) -> HostResult<()> {
                request.session(true);
                response.write_str("ok")
            }
        }

        let unit = DeploymentUnit::new("shop.war").handler("s", CreatesSession, &["/s"]);
        let app = Arc::new(Application::new(unit, AppSettings::default()).unwrap());
        app.init().unwrap();

        let out = Arc::clone(&app).serve(InboundMessage::get("/shop/s")).await.unwrap();
        let cookie = out.header("set-cookie").unwrap().to_string();
        assert!(cookie.starts_with("JSESSIONID="));
        assert!(cookie.contains("Path=/shop"));
        assert!(cookie.contains("HttpOnly"));
        assert!(!cookie.contains("Max-Age"));
        assert_eq!(app.sessions().len(), 1);

        let id = cookie.trim_start_matches("JSESSIONID=").split(';').next().unwrap();
        let again = Arc::clone(&app)
            .serve(InboundMessage::get("/shop/s").with_header("Cookie", &format!("JSESSIONID={}", id)))
            .await
            .unwrap();
        assert!(again.header("set-cookie").is_none());
        assert_eq!(app.sessions().len(), 1);
    }

    #[tokio::test]
    async fn panicking_handler_yields_500() {
        struct Panics;

        #[async_trait]
        impl Handler for Panics {
            async fn handle(&self, _request: &mut Request, _response: &Response) -> HostResult<()> {
                panic!("handler exploded");
            }
        }

        let app = Arc::new(
            Application::new(DeploymentUnit::new("app").handler("p", Panics, &["/p"]), AppSettings::default())
                .unwrap(),
        );
        app.init().unwrap();
        let out = Arc::clone(&app).serve(InboundMessage::get("/app/p")).await.unwrap();
        assert_eq!(out.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(app.pool().in_flight(), 0);
    }

    #[tokio::test]
    async fn unload_refuses_new_requests() {
        let hits = Arc::new(AtomicUsize::new(0));

        struct Counts(Arc<AtomicUsize>);

        #[async_trait]
        impl Handler for Counts {
            async fn handle(&self, _request: &mut Request, _response: &Response) -> HostResult<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let unit = DeploymentUnit::new("app").handler("c", Counts(Arc::clone(&hits)), &["/c"]);
        let app = Arc::new(Application::new(unit, AppSettings::default()).unwrap());
        app.init().unwrap();
        app.unload().await;

        let out = Arc::clone(&app).serve(InboundMessage::get("/app/c")).await.unwrap();
        assert_eq!(out.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
