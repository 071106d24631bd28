//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Deploy applications → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections
//!         → Unload applications (drain pools, destroy hooks) → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then applications, then the listener
//! - Ordered shutdown: stop accept, drain, unload

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
