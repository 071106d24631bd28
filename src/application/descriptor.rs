//! Deployment descriptors and the catalog that turns them into units.
//!
//! A descriptor names handler and filter implementations by `kind`. The
//! catalog maps each kind to a factory, standing in for loading an
//! implementation by name. `static` is built in.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::application::static_files::StaticResourceHandler;
use crate::application::unit::{DeploymentUnit, FilterDefinition, HandlerDefinition};
use crate::dispatch::{DispatchType, Filter, Handler};
use crate::error::{HostError, HostResult};

/// Built-in kind serving files from the unit's resource root.
pub const STATIC_KIND: &str = "static";

/// Declarative description of one application.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct UnitDescriptor {
    pub name: String,
    pub mount: Option<String>,
    pub resource_root: Option<PathBuf>,
    pub handlers: Vec<HandlerDescriptor>,
    pub filters: Vec<FilterDescriptor>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HandlerDescriptor {
    pub name: String,
    pub kind: String,
    pub url_patterns: Vec<String>,
    pub init_params: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterDescriptor {
    pub name: String,
    pub kind: String,
    pub url_patterns: Vec<String>,
    pub handler_names: Vec<String>,
    pub dispatcher_types: Vec<DispatchType>,
    pub init_params: HashMap<String, String>,
}

impl Default for FilterDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: String::new(),
            url_patterns: Vec::new(),
            handler_names: Vec::new(),
            dispatcher_types: vec![DispatchType::Request],
            init_params: HashMap::new(),
        }
    }
}

pub type HandlerFactory = Arc<dyn Fn(&HandlerDescriptor) -> HostResult<Arc<dyn Handler>> + Send + Sync>;
pub type FilterFactory = Arc<dyn Fn(&FilterDescriptor) -> HostResult<Arc<dyn Filter>> + Send + Sync>;

/// Registry of handler and filter kinds.
#[derive(Clone)]
pub struct HandlerCatalog {
    handlers: HashMap<String, HandlerFactory>,
    filters: HashMap<String, FilterFactory>,
}

impl Default for HandlerCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut handlers: Vec<_> = self.handlers.keys().collect();
        let mut filters: Vec<_> = self.filters.keys().collect();
        handlers.sort();
        filters.sort();
        f.debug_struct("HandlerCatalog")
            .field("handlers", &handlers)
            .field("filters", &filters)
            .finish()
    }
}

impl HandlerCatalog {
    /// A catalog holding the built-in kinds.
    pub fn new() -> Self {
        let mut catalog = Self {
            handlers: HashMap::new(),
            filters: HashMap::new(),
        };
        catalog.register_handler(STATIC_KIND, |_| -> HostResult<Arc<dyn Handler>> {
            Ok(Arc::new(StaticResourceHandler::new()))
        });
        catalog
    }

    /// Register a factory for handlers of `kind`.
    pub fn register_handler<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&HandlerDescriptor) -> HostResult<Arc<dyn Handler>> + Send + Sync + 'static,
    {
        self.handlers.insert(kind.into(), Arc::new(factory));
    }

    /// Register a factory for filters of `kind`.
    pub fn register_filter<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&FilterDescriptor) -> HostResult<Arc<dyn Filter>> + Send + Sync + 'static,
    {
        self.filters.insert(kind.into(), Arc::new(factory));
    }

    /// Check if a handler kind is registered.
    pub fn has_handler_kind(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Instantiate every handler and filter a descriptor names.
    ///
    /// Unknown kinds fail the unit with a `Lifecycle` error.
    pub fn build_unit(&self, descriptor: &UnitDescriptor) -> HostResult<DeploymentUnit> {
        let mut unit = DeploymentUnit::new(descriptor.name.clone());
        unit.mount = descriptor.mount.clone();
        unit.resource_root = descriptor.resource_root.clone();

        for handler in &descriptor.handlers {
            let factory = self.handlers.get(&handler.kind).ok_or_else(|| {
                HostError::lifecycle(
                    &descriptor.name,
                    format!("unknown handler kind `{}` for `{}`", handler.kind, handler.name),
                )
            })?;
            let mut definition = HandlerDefinition::new(handler.name.clone(), factory(handler)?);
            definition.url_patterns = handler.url_patterns.clone();
            definition.init_params = handler.init_params.clone();
            unit.handlers.push(definition);
        }

        for filter in &descriptor.filters {
            let factory = self.filters.get(&filter.kind).ok_or_else(|| {
                HostError::lifecycle(
                    &descriptor.name,
                    format!("unknown filter kind `{}` for `{}`", filter.kind, filter.name),
                )
            })?;
            let mut definition = FilterDefinition::new(filter.name.clone(), factory(filter)?);
            definition.url_patterns = filter.url_patterns.clone();
            definition.handler_names = filter.handler_names.clone();
            definition.dispatch_types = filter.dispatcher_types.clone();
            definition.init_params = filter.init_params.clone();
            unit.filters.push(definition);
        }

        Ok(unit)
    }
}
