//! Application subsystem: isolated, independently deployed units.
//!
//! # Data Flow
//! ```text
//! UnitDescriptor (config) ──HandlerCatalog──▶ DeploymentUnit
//!     → registry.rs load (Application::new, init hooks, publish)
//!     → entry.rs (dispatcher, session store, worker pool per application)
//!
//! Inbound request
//!     → registry.rs resolve_entry (longest mount key)
//!     → entry.rs serve
//! ```
//!
//! # Design Decisions
//! - No global handler namespace: every table hangs off its Application
//! - Entries are arena-style values behind `Arc`, indexed by mount key

pub mod descriptor;
pub mod entry;
pub mod pool;
pub mod registry;
pub mod static_files;
pub mod unit;

pub use descriptor::{FilterDescriptor, HandlerCatalog, HandlerDescriptor, UnitDescriptor};
pub use entry::Application;
pub use pool::WorkerPool;
pub use registry::ApplicationRegistry;
pub use static_files::StaticResourceHandler;
pub use unit::{DeploymentUnit, FilterDefinition, HandlerDefinition};
