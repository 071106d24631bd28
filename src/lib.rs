//! Multi-tenant embedded HTTP application host.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────────────────────────────────────┐
//!                    │                      APP HOST                          │
//!                    │                                                        │
//!  Client Request    │  ┌─────────┐   ┌──────────────┐   ┌──────────────┐    │
//!  ──────────────────┼─▶│  http   │──▶│ application  │──▶│ Application  │    │
//!                    │  │ server  │   │  registry    │   │ (per mount)  │    │
//!                    │  └─────────┘   └──────────────┘   └──────┬───────┘    │
//!                    │                                          │            │
//!                    │                 ┌────────────────────────┼──────┐     │
//!                    │                 │ worker pool            ▼      │     │
//!                    │                 │  Request facade ─▶ dispatcher │     │
//!                    │                 │  session store     filters    │     │
//!                    │                 │  async context     handler    │     │
//!                    │                 └────────────────────────┬──────┘     │
//!  Client Response   │  ┌─────────┐                             │            │
//!  ◀─────────────────┼──│response │◀────────────────────────────┘            │
//!                    │  └─────────┘                                          │
//!                    │                                                        │
//!                    │  Cross-cutting: config, lifecycle, observability       │
//!                    └───────────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod application;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod http;
pub mod session;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use application::{Application, ApplicationRegistry, DeploymentUnit, HandlerCatalog};
pub use config::HostConfig;
pub use dispatch::{AsyncContext, DispatchType, Filter, FilterChain, Handler, UnitConfig};
pub use error::{HostError, HostResult};
pub use host::Host;
pub use http::{HttpServer, InboundMessage, OutboundMessage, Request, Response};
pub use lifecycle::Shutdown;
