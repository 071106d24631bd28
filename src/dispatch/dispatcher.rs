//! Per-application request dispatcher.
//!
//! # Responsibilities
//! - Resolve a mount-relative path to one handler registration
//! - Build the filter chain for the resolved handler and dispatch type
//! - Turn unhandled failures into error responses at the top level
//! - Re-enter resolution for forward/include
//!
//! # Design Decisions
//! - Tables are built once while the unit loads and only read afterwards,
//!   so lookups take no locks
//! - Resolution order: exact, longest prefix, extension, default. Within a
//!   kind the first registration wins
//!
//! # Data Flow
//! ```text
//! path → resolve() → HandlerRegistration
//!      → filters_for(path, handler, dispatch type)
//!      → FilterChain::proceed → filter … filter → Handler::handle
//! ```

use std::collections::HashMap;
use std::error::Error as _;
use std::sync::Arc;

use axum::http::StatusCode;

use crate::dispatch::chain::FilterChain;
use crate::dispatch::handler::{DispatchType, FilterRegistration, HandlerRegistration};
use crate::dispatch::pattern::{extension_of, is_path_prefix, UrlPattern};
use crate::error::{HostError, HostResult};
use crate::http::request::{Request, FORWARD_PATH_ATTRIBUTE};
use crate::http::response::Response;

/// Result of a top-level dispatch.
#[derive(Debug)]
pub enum DispatchOutcome {
    Handled,
    /// No handler and no default; a 404 was written.
    NotFound,
    /// A filter or handler failed; a 500 was written. The error is kept
    /// for the caller's bookkeeping.
    Failed(HostError),
}

/// Handler and filter tables of one application.
#[derive(Debug)]
pub struct Dispatcher {
    application: String,
    handlers: Vec<Arc<HandlerRegistration>>,
    by_name: HashMap<String, usize>,
    exact: HashMap<String, usize>,
    prefixes: Vec<(String, usize)>,
    extensions: HashMap<String, usize>,
    default: Option<usize>,
    filters: Vec<Arc<FilterRegistration>>,
}

impl Dispatcher {
    /// Create an empty dispatcher for `application`.
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            handlers: Vec::new(),
            by_name: HashMap::new(),
            exact: HashMap::new(),
            prefixes: Vec::new(),
            extensions: HashMap::new(),
            default: None,
            filters: Vec::new(),
        }
    }

    /// Register a handler. Names must be unique within the application.
    pub fn add_handler(&mut self, registration: HandlerRegistration) -> HostResult<()> {
        if self.by_name.contains_key(&registration.name) {
            return Err(HostError::lifecycle(
                &self.application,
                format!("duplicate handler name `{}`", registration.name),
            ));
        }
        let index = self.handlers.len();
        for pattern in &registration.patterns {
            match pattern {
                UrlPattern::Exact(path) => {
                    self.exact.entry(path.clone()).or_insert(index);
                }
                UrlPattern::Prefix(prefix) => self.prefixes.push((prefix.clone(), index)),
                UrlPattern::Extension(ext) => {
                    self.extensions.entry(ext.clone()).or_insert(index);
                }
                UrlPattern::Default => {
                    self.default.get_or_insert(index);
                }
            }
        }
        self.by_name.insert(registration.name.clone(), index);
        self.handlers.push(Arc::new(registration));
        Ok(())
    }

    /// Register a filter. Chain order follows registration order.
    pub fn add_filter(&mut self, registration: FilterRegistration) {
        self.filters.push(Arc::new(registration));
    }

    /// Check if a default (`/`) handler is registered.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Handlers in registration order.
    pub fn handlers(&self) -> &[Arc<HandlerRegistration>] {
        &self.handlers
    }

    /// Filters in registration order.
    pub fn filters(&self) -> &[Arc<FilterRegistration>] {
        &self.filters
    }

    /// Look up a handler by name.
    pub fn handler(&self, name: &str) -> Option<&Arc<HandlerRegistration>> {
        self.by_name.get(name).map(|&i| &self.handlers[i])
    }

    /// Pick the handler for a mount-relative path.
    pub fn resolve(&self, path: &str) -> Option<&Arc<HandlerRegistration>> {
        if let Some(&i) = self.exact.get(path) {
            return Some(&self.handlers[i]);
        }

        let mut best: Option<(usize, usize)> = None;
        for (prefix, index) in &self.prefixes {
            if is_path_prefix(path, prefix) && best.map_or(true, |(len, _)| prefix.len() > len) {
                best = Some((prefix.len(), *index));
            }
        }
        if let Some((_, i)) = best {
            return Some(&self.handlers[i]);
        }

        if let Some(ext) = extension_of(path) {
            if let Some(&i) = self.extensions.get(ext) {
                return Some(&self.handlers[i]);
            }
        }

        self.default.map(|i| &self.handlers[i])
    }

    /// Filters wrapping `handler` at `path` for `dispatch_type`, in registration order.
    pub fn filters_for(
        &self,
        path: &str,
        handler: &str,
        dispatch_type: DispatchType,
    ) -> Vec<Arc<FilterRegistration>> {
        self.filters
            .iter()
            .filter(|f| f.applies(path, handler, dispatch_type))
            .cloned()
            .collect()
    }

    /// Top-level dispatch of a request at its current path and dispatch type.
    ///
    /// Never fails: unresolved paths become 404 and failures become 500.
    pub async fn dispatch(&self, request: &mut Request, response: &Response) -> DispatchOutcome {
        let path = request.path().to_string();
        let dispatch_type = request.dispatch_type();

        match self.invoke(request, response, &path, dispatch_type).await {
            Ok(()) => DispatchOutcome::Handled,
            Err(HostError::NotFound(_)) => {
                tracing::debug!(application = %self.application, path = %path, "No handler resolved");
                write_error(response, StatusCode::NOT_FOUND, "Not Found");
                DispatchOutcome::NotFound
            }
            Err(err) => {
                tracing::error!(
                    application = %self.application,
                    path = %path,
                    dispatch_type = ?dispatch_type,
                    error = %err,
                    source = ?err.source(),
                    "Request failed, responding 500"
                );
                write_error(response, StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
                DispatchOutcome::Failed(err)
            }
        }
    }

    /// Forward to `target`, discarding any buffered output first.
    pub async fn forward(&self, request: &mut Request, response: &Response, target: &str) -> HostResult<()> {
        response.reset_buffer()?;
        self.redispatch(request, response, target, DispatchType::Forward).await
    }

    /// Run `target` and keep the output it writes.
    pub async fn include(&self, request: &mut Request, response: &Response, target: &str) -> HostResult<()> {
        self.redispatch(request, response, target, DispatchType::Include).await
    }

    async fn redispatch(
        &self,
        request: &mut Request,
        response: &Response,
        target: &str,
        dispatch_type: DispatchType,
    ) -> HostResult<()> {
        let target_path = normalize_target(target);
        let origin = request.path().to_string();
        let previous_type = request.dispatch_type();
        let previous_origin = request.attribute::<String>(FORWARD_PATH_ATTRIBUTE);

        tracing::debug!(
            application = %self.application,
            from = %origin,
            to = %target_path,
            dispatch_type = ?dispatch_type,
            "Re-dispatching request"
        );

        request.set_attribute(FORWARD_PATH_ATTRIBUTE, Some(origin));
        request.set_dispatch_type(dispatch_type);
        let previous_path = request.replace_dispatch_path(Some(target_path.clone()));

        let result = self.invoke(request, response, &target_path, dispatch_type).await;

        request.replace_dispatch_path(previous_path);
        request.set_dispatch_type(previous_type);
        match previous_origin {
            Some(origin) => request.set_attribute(FORWARD_PATH_ATTRIBUTE, Some(origin.as_ref().clone())),
            None => {
                request.remove_attribute(FORWARD_PATH_ATTRIBUTE);
            }
        }
        result
    }

    async fn invoke(
        &self,
        request: &mut Request,
        response: &Response,
        path: &str,
        dispatch_type: DispatchType,
    ) -> HostResult<()> {
        let handler = self
            .resolve(path)
            .ok_or_else(|| HostError::NotFound(path.to_string()))?;
        let filters = self.filters_for(path, &handler.name, dispatch_type);

        tracing::trace!(
            application = %self.application,
            path = %path,
            handler = %handler.name,
            filters = filters.len(),
            "Dispatching"
        );

        FilterChain::new(&filters, handler).proceed(request, response).await
    }
}

fn write_error(response: &Response, status: StatusCode, message: &str) {
    if let Err(err) = response.send_error(status, message) {
        tracing::debug!(error = %err, status = status.as_u16(), "Response already committed, error not written");
    }
}

/// Drop the query and make the path absolute.
pub(crate) fn normalize_target(target: &str) -> String {
    let path = target.split('?').next().unwrap_or_default();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handler::{Handler, UnitConfig};
    use async_trait::async_trait;

    struct Named;

    #[async_trait]
    impl Handler for Named {
        async fn handle(&self, _request: &mut Request, _response: &Response) -> HostResult<()> {
            Ok(())
        }
    }

    fn registration(name: &str, patterns: &[&str]) -> HandlerRegistration {
        HandlerRegistration {
            name: name.to_string(),
            patterns: patterns.iter().map(|p| UrlPattern::parse(p).unwrap()).collect(),
            handler: Arc::new(Named),
            config: UnitConfig::default(),
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut d = Dispatcher::new("test");
        d.add_handler(registration("prefix", &["/a/*"])).unwrap();
        d.add_handler(registration("exact", &["/a/b"])).unwrap();
        d.add_handler(registration("ext", &["*.ext"])).unwrap();
        d.add_handler(registration("default", &["/"])).unwrap();
        d
    }

    fn resolved(d: &Dispatcher, path: &str) -> Option<String> {
        d.resolve(path).map(|h| h.name.clone())
    }

    #[test]
    fn precedence_exact_prefix_extension_default() {
        let d = dispatcher();
        assert_eq!(resolved(&d, "/a/b").as_deref(), Some("exact"));
        assert_eq!(resolved(&d, "/a/x.ext").as_deref(), Some("prefix"));
        assert_eq!(resolved(&d, "/other/x.ext").as_deref(), Some("ext"));
        assert_eq!(resolved(&d, "/nothing").as_deref(), Some("default"));
    }

    #[test]
    fn longest_prefix_wins_and_ties_go_to_first() {
        let mut d = Dispatcher::new("test");
        d.add_handler(registration("short", &["/a/*"])).unwrap();
        d.add_handler(registration("long", &["/a/b/*"])).unwrap();
        d.add_handler(registration("late", &["/a/b/*"])).unwrap();
        assert_eq!(resolved(&d, "/a/b/c").as_deref(), Some("long"));
        assert_eq!(resolved(&d, "/a/c").as_deref(), Some("short"));
    }

    #[test]
    fn first_exact_registration_wins() {
        let mut d = Dispatcher::new("test");
        d.add_handler(registration("one", &["/x"])).unwrap();
        d.add_handler(registration("two", &["/x"])).unwrap();
        assert_eq!(resolved(&d, "/x").as_deref(), Some("one"));
    }

    #[test]
    fn no_default_means_unresolved() {
        let mut d = Dispatcher::new("test");
        d.add_handler(registration("only", &["/only"])).unwrap();
        assert!(resolved(&d, "/missing").is_none());
        assert!(!d.has_default());
    }

    #[test]
    fn duplicate_handler_names_are_rejected() {
        let mut d = Dispatcher::new("test");
        d.add_handler(registration("h", &["/a"])).unwrap();
        let err = d.add_handler(registration("h", &["/b"])).unwrap_err();
        assert!(matches!(err, HostError::Lifecycle { .. }));
    }

    #[test]
    fn target_normalization() {
        assert_eq!(normalize_target("/x?y=1"), "/x");
        assert_eq!(normalize_target("x"), "/x");
    }
}
