//! Request dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Application pipeline
//!     → dispatcher.rs (resolve handler, select filters)
//!     → chain.rs (filter … filter → handler)
//!     → handler.rs (application code via the Handler/Filter traits)
//!     → async_context.rs (optional: complete later, re-dispatch, time out)
//! ```

pub mod async_context;
pub mod chain;
pub mod dispatcher;
pub mod handler;
pub mod pattern;

pub use async_context::{AsyncContext, AsyncOutcome, AsyncState};
pub use chain::FilterChain;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use handler::{DispatchType, Filter, FilterRegistration, Handler, HandlerRegistration, UnitConfig};
pub use pattern::UrlPattern;
