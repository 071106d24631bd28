//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! Request::session(create)
//!     → requested id (cookie, URL parameter, or generated)
//!     → store.rs (get / get_or_create, per application)
//!     → session.rs (attributes, new flag, idle expiry)
//!     → pipeline adds Set-Cookie when the session was created
//! ```

#[allow(clippy::module_inception)]
pub mod session;
pub mod store;

pub use session::Session;
pub use store::SessionStore;
