//! Handler and filter contracts plus their registrations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dispatch::chain::FilterChain;
use crate::dispatch::pattern::UrlPattern;
use crate::error::HostResult;
use crate::http::request::Request;
use crate::http::response::Response;

/// How a request reached a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchType {
    Request,
    Forward,
    Include,
    Async,
}

/// Initialization parameters handed to a handler or filter.
#[derive(Debug, Clone, Default)]
pub struct UnitConfig {
    pub name: String,
    pub application: String,
    pub init_params: HashMap<String, String>,
    /// Resource scope of the owning application, if it has one.
    pub resource_root: Option<PathBuf>,
}

impl UnitConfig {
    /// Get an init parameter.
    pub fn init_param(&self, name: &str) -> Option<&str> {
        self.init_params.get(name).map(String::as_str)
    }
}

/// Application-supplied request handler.
///
/// `init` runs once before the first request and `destroy` once on unload.
#[async_trait]
pub trait Handler: Send + Sync {
    fn init(&self, _config: &UnitConfig) -> HostResult<()> {
        Ok(())
    }

    async fn handle(&self, request: &mut Request, response: &Response) -> HostResult<()>;

    fn destroy(&self) {}
}

/// Application-supplied interceptor wrapped around handler execution.
///
/// A filter that returns without calling `chain.proceed` short-circuits
/// the rest of the chain.
#[async_trait]
pub trait Filter: Send + Sync {
    fn init(&self, _config: &UnitConfig) -> HostResult<()> {
        Ok(())
    }

    async fn filter(
        &self,
        request: &mut Request,
        response: &Response,
        chain: FilterChain<'_>,
    ) -> HostResult<()>;

    fn destroy(&self) {}
}

/// A named handler bound to its URL patterns.
pub struct HandlerRegistration {
    pub name: String,
    pub patterns: Vec<UrlPattern>,
    pub handler: Arc<dyn Handler>,
    pub config: UnitConfig,
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("name", &self.name)
            .field("patterns", &self.patterns)
            .finish_non_exhaustive()
    }
}

/// A named filter bound to URL patterns and/or handler names.
pub struct FilterRegistration {
    pub name: String,
    pub patterns: Vec<UrlPattern>,
    pub handler_names: Vec<String>,
    pub dispatch_types: Vec<DispatchType>,
    pub filter: Arc<dyn Filter>,
    pub config: UnitConfig,
}

impl std::fmt::Debug for FilterRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistration")
            .field("name", &self.name)
            .field("patterns", &self.patterns)
            .field("handler_names", &self.handler_names)
            .field("dispatch_types", &self.dispatch_types)
            .finish_non_exhaustive()
    }
}

impl FilterRegistration {
    /// True when this filter wraps `handler` at `path` for `dispatch_type`.
    pub fn applies(&self, path: &str, handler: &str, dispatch_type: DispatchType) -> bool {
        self.dispatch_types.contains(&dispatch_type)
            && (self.patterns.iter().any(|p| p.matches(path))
                || self.handler_names.iter().any(|n| n == handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Filter for Noop {
        async fn filter(
            &self,
            request: &mut Request,
            response: &Response,
            chain: FilterChain<'_>,
        ) -> HostResult<()> {
            chain.proceed(request, response).await
        }
    }

    fn registration(patterns: &[&str], handlers: &[&str], types: &[DispatchType]) -> FilterRegistration {
        FilterRegistration {
            name: "f".into(),
            patterns: patterns.iter().map(|p| UrlPattern::parse(p).unwrap()).collect(),
            handler_names: handlers.iter().map(|s| s.to_string()).collect(),
            dispatch_types: types.to_vec(),
            filter: Arc::new(Noop),
            config: UnitConfig::default(),
        }
    }

    #[test]
    fn filter_applies_by_pattern_or_handler_name() {
        let by_pattern = registration(&["/admin/*"], &[], &[DispatchType::Request]);
        assert!(by_pattern.applies("/admin/users", "any", DispatchType::Request));
        assert!(!by_pattern.applies("/public", "any", DispatchType::Request));

        let by_name = registration(&[], &["reports"], &[DispatchType::Request]);
        assert!(by_name.applies("/whatever", "reports", DispatchType::Request));
        assert!(!by_name.applies("/whatever", "other", DispatchType::Request));
    }

    #[test]
    fn filter_respects_dispatch_types() {
        let reg = registration(&["/*"], &[], &[DispatchType::Request]);
        assert!(!reg.applies("/x", "h", DispatchType::Forward));
        assert!(!reg.applies("/x", "h", DispatchType::Include));
    }

    #[test]
    fn dispatch_type_uses_lowercase_names() {
        #[derive(Deserialize)]
        struct Types {
            t: Vec<DispatchType>,
        }
        let parsed: Types = toml::from_str("t = [\"forward\", \"async\"]").unwrap();
        assert_eq!(parsed.t, vec![DispatchType::Forward, DispatchType::Async]);
    }
}
