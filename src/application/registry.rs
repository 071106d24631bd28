//! Application registry keyed by mount key.
//!
//! # Responsibilities
//! - Load units: build tables, run init hooks, publish the entry
//! - Resolve an inbound path to the application that owns it
//! - Unload one application or all of them
//!
//! # Design Decisions
//! - `DashMap` so lookups from many request tasks never block each other
//! - An entry becomes routable only after its init hooks succeeded
//! - Duplicate mount keys are refused; the first loaded unit stays routable
//! - Resolution walks the path upwards segment by segment, so the longest
//!   mount key wins and `/app1` never owns `/app10`

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;

use crate::application::descriptor::{HandlerCatalog, UnitDescriptor};
use crate::application::entry::Application;
use crate::application::unit::DeploymentUnit;
use crate::config::AppSettings;
use crate::error::{HostError, HostResult};
use crate::http::request::target_path;

/// All deployed applications of one host.
#[derive(Debug)]
pub struct ApplicationRegistry {
    entries: DashMap<String, Arc<Application>>,
    settings: AppSettings,
}

impl ApplicationRegistry {
    /// Create an empty registry.
    pub fn new(settings: AppSettings) -> Self {
        Self {
            entries: DashMap::new(),
            settings,
        }
    }

    /// Load a unit and make it routable.
    ///
    /// Init failures and duplicate mount keys are `Lifecycle` errors; in
    /// both cases nothing is published.
    pub fn load(&self, unit: DeploymentUnit) -> HostResult<Arc<Application>> {
        let mount = unit.mount_key();
        let name = unit.name.clone();
        if self.entries.contains_key(&mount) {
            return Err(duplicate_mount(&name, &mount));
        }

        let app = Arc::new(Application::new(unit, self.settings.clone())?);
        app.init()?;

        match self.entries.entry(mount.clone()) {
            Entry::Occupied(_) => {
                app.destroy();
                return Err(duplicate_mount(&name, &mount));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&app));
            }
        }

        app.start_sweeper();
        tracing::info!(
            application = %name,
            mount = %display_mount(&mount),
            handlers = app.dispatcher().handlers().len(),
            filters = app.dispatcher().filters().len(),
            "Application loaded"
        );
        Ok(app)
    }

    /// Build a unit from a descriptor via `catalog`, then load it.
    pub fn load_descriptor(
        &self,
        descriptor: &UnitDescriptor,
        catalog: &HandlerCatalog,
    ) -> HostResult<Arc<Application>> {
        let unit = catalog.build_unit(descriptor)?;
        self.load(unit)
    }

    /// The application owning a request target (path or full URI).
    pub fn resolve_entry(&self, target: &str) -> Option<Arc<Application>> {
        let mut candidate = target_path(target).trim_end_matches('/');
        loop {
            if let Some(entry) = self.entries.get(candidate) {
                return Some(Arc::clone(entry.value()));
            }
            if candidate.is_empty() {
                return None;
            }
            candidate = match candidate.rfind('/') {
                Some(i) => &candidate[..i],
                None => "",
            };
        }
    }

    /// Get the application with this exact mount key.
    pub fn get(&self, mount: &str) -> Option<Arc<Application>> {
        self.entries.get(mount).map(|e| Arc::clone(e.value()))
    }

    /// Mount keys, sorted.
    pub fn mounts(&self) -> Vec<String> {
        let mut mounts: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        mounts.sort();
        mounts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove an application from routing and unload it.
    pub async fn unload(&self, mount: &str) -> HostResult<()> {
        let (_, app) = self
            .entries
            .remove(mount)
            .ok_or_else(|| HostError::NotFound(format!("no application mounted at `{}`", display_mount(mount))))?;
        app.unload().await;
        Ok(())
    }

    /// Unload every application.
    pub async fn shutdown(&self) {
        let mounts = self.mounts();
        tracing::info!(applications = mounts.len(), "Unloading all applications");
        let apps: Vec<_> = mounts
            .iter()
            .filter_map(|m| self.entries.remove(m).map(|(_, app)| app))
            .collect();
        join_all(apps.iter().map(|app| app.unload())).await;
    }
}

fn duplicate_mount(name: &str, mount: &str) -> HostError {
    HostError::lifecycle(name, format!("mount key `{}` is already in use", display_mount(mount)))
}

fn display_mount(mount: &str) -> &str {
    if mount.is_empty() {
        "/"
    } else {
        mount
    }
}
