//! Error taxonomy for the host.
//!
//! # Categories
//! - `Decode`: malformed header, date or cookie data. Usually recovered
//!   locally by treating the field as absent.
//! - `IllegalArgument`: the caller asked for strict parsing of bad input.
//! - `IllegalState`: a programming error in a handler (double body access,
//!   double async completion, writes after flush). Always surfaced.
//! - `Lifecycle`: handler/filter init or destroy failures, unknown
//!   handler kinds, duplicate mount keys.
//! - `NotFound`: nothing resolvable for a path.
//! - `Runtime`: uncaught failure from a handler or filter body. The source
//!   is kept so it can be logged at the dispatcher boundary.
//! - `ClientDisconnected`: the connection went away before completion.

use thiserror::Error;

/// Boxed error type accepted by [`HostError::Runtime`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the request-dispatch engine.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("lifecycle error in `{unit}`: {message}")]
    Lifecycle { unit: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("handler failure: {0}")]
    Runtime(#[source] BoxError),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Wrap an arbitrary handler failure.
    pub fn runtime(err: impl Into<BoxError>) -> Self {
        HostError::Runtime(err.into())
    }

    /// Build a lifecycle error attributed to a deployable unit.
    pub fn lifecycle(unit: impl Into<String>, message: impl Into<String>) -> Self {
        HostError::Lifecycle {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Create an `IllegalState` error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        HostError::IllegalState(message.into())
    }

    /// True for errors that indicate a handler bug rather than bad input.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, HostError::IllegalState(_))
    }
}

/// Result type alias for host operations.
pub type HostResult<T> = std::result::Result<T, HostError>;
