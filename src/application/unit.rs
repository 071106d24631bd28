//! Deployable units: the handler and filter set of one application.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::dispatch::{DispatchType, Filter, Handler};

/// A handler with its name, URL mappings and init parameters.
#[derive(Clone)]
pub struct HandlerDefinition {
    pub name: String,
    pub handler: Arc<dyn Handler>,
    pub url_patterns: Vec<String>,
    pub init_params: HashMap<String, String>,
}

impl HandlerDefinition {
    /// Create a definition with no patterns.
    pub fn new(name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            name: name.into(),
            handler,
            url_patterns: Vec::new(),
            init_params: HashMap::new(),
        }
    }

    /// Map to one more URL pattern.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.url_patterns.push(pattern.into());
        self
    }

    /// Add an init parameter.
    pub fn init_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.init_params.insert(name.into(), value.into());
        self
    }
}

/// A filter with its mappings and the dispatch types it applies to.
#[derive(Clone)]
pub struct FilterDefinition {
    pub name: String,
    pub filter: Arc<dyn Filter>,
    pub url_patterns: Vec<String>,
    pub handler_names: Vec<String>,
    pub dispatch_types: Vec<DispatchType>,
    pub init_params: HashMap<String, String>,
}

impl FilterDefinition {
    /// A filter for initial requests only, until told otherwise.
    pub fn new(name: impl Into<String>, filter: Arc<dyn Filter>) -> Self {
        Self {
            name: name.into(),
            filter,
            url_patterns: Vec::new(),
            handler_names: Vec::new(),
            dispatch_types: vec![DispatchType::Request],
            init_params: HashMap::new(),
        }
    }

    /// Map to one more URL pattern.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.url_patterns.push(pattern.into());
        self
    }

    /// Also apply to requests served by the named handler.
    pub fn handler_name(mut self, name: impl Into<String>) -> Self {
        self.handler_names.push(name.into());
        self
    }

    /// Replace the dispatch types the filter applies to.
    pub fn dispatch_types(mut self, types: &[DispatchType]) -> Self {
        self.dispatch_types = types.to_vec();
        self
    }

    /// Add an init parameter.
    pub fn init_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.init_params.insert(name.into(), value.into());
        self
    }
}

/// Everything needed to load one application.
#[derive(Clone, Default)]
pub struct DeploymentUnit {
    pub name: String,
    pub mount: Option<String>,
    pub resource_root: Option<PathBuf>,
    pub handlers: Vec<HandlerDefinition>,
    pub filters: Vec<FilterDefinition>,
}

impl std::fmt::Debug for DeploymentUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentUnit")
            .field("name", &self.name)
            .field("mount", &self.mount_key())
            .field("handlers", &self.handlers.iter().map(|h| &h.name).collect::<Vec<_>>())
            .field("filters", &self.filters.iter().map(|f| &f.name).collect::<Vec<_>>())
            .finish()
    }
}

impl DeploymentUnit {
    /// Create an empty unit; the mount is derived from `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Mount explicitly instead of deriving the key from the name.
    pub fn mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = Some(mount.into());
        self
    }

    /// Serve static files from `root`.
    pub fn resource_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resource_root = Some(root.into());
        self
    }

    /// Register `handler` under `name` at the given URL patterns.
    pub fn handler(self, name: &str, handler: impl Handler + 'static, patterns: &[&str]) -> Self {
        let definition = patterns
            .iter()
            .fold(HandlerDefinition::new(name, Arc::new(handler)), |d, p| d.pattern(*p));
        self.with_handler(definition)
    }

    /// Add a fully built handler definition.
    pub fn with_handler(mut self, definition: HandlerDefinition) -> Self {
        self.handlers.push(definition);
        self
    }

    /// Register `filter` for initial requests at the given URL patterns.
    pub fn filter(self, name: &str, filter: impl Filter + 'static, patterns: &[&str]) -> Self {
        let definition = patterns
            .iter()
            .fold(FilterDefinition::new(name, Arc::new(filter)), |d, p| d.pattern(*p));
        self.with_filter(definition)
    }

    /// Add a fully built filter definition.
    pub fn with_filter(mut self, definition: FilterDefinition) -> Self {
        self.filters.push(definition);
        self
    }

    /// The mount key this unit is routed under.
    pub fn mount_key(&self) -> String {
        derive_mount(&self.name, self.mount.as_deref())
    }
}

/// Mount key for a unit: the explicit mount if given, else `/` plus the
/// name without its last extension. `""` is the root application.
pub fn derive_mount(name: &str, mount: Option<&str>) -> String {
    let raw = match mount {
        Some(mount) => mount.trim(),
        None => {
            let name = name.trim();
            match name.rsplit_once('.') {
                Some((base, ext)) if !base.is_empty() && !ext.is_empty() && !ext.contains('/') => base,
                _ => name,
            }
        }
    };
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
