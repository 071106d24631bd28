//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, body aggregation, close signal)
//!     → message.rs (InboundMessage handed to the host)
//!     → request.rs (lazy facade: path, cookies, parameters, session id)
//!     → [dispatcher runs filters and the handler]
//!     → response.rs (buffered sink, flushed once)
//!     → message.rs (OutboundMessage) → Send to client
//! ```
//!
//! # Design Decisions
//! - The core never sees axum types; `server.rs` is the only adapter
//! - Decoders (cookie, date, params) are plain functions over `&str`

pub mod body;
pub mod cookie;
pub mod date;
pub mod message;
pub mod params;
pub mod request;
pub mod response;
pub mod server;

pub use message::{close_signal, CloseNotifier, CloseSignal, InboundMessage, OutboundMessage};
pub use request::{Request, SessionIdSource};
pub use response::Response;
pub use server::HttpServer;
