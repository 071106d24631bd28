//! Messages exchanged with the transport layer.
//!
//! # Responsibilities
//! - Carry one decoded inbound request (method, raw URI, headers, body, peer)
//! - Carry the produced response back to the transport
//! - Signal connection close so async work can be cancelled
//!
//! # Design Decisions
//! - The body is already aggregated by the transport; the core never frames bytes
//! - The close signal is a watch channel fired by a drop guard, so a dropped
//!   transport future counts as a disconnect

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tokio::sync::watch;

/// A decoded inbound HTTP message handed to the core by the transport.
#[derive(Debug)]
pub struct InboundMessage {
    pub method: Method,
    /// Raw request target as received (origin-form, possibly with a query).
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub peer_addr: Option<SocketAddr>,
    pub closed: CloseSignal,
}

impl InboundMessage {
    /// Create a message with no headers, an empty body and no close signal.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            peer_addr: None,
            closed: CloseSignal::never(),
        }
    }

    /// Create a `GET` message for `uri`.
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    /// Create a `POST` message for `uri`.
    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Append a header. Invalid names or values are dropped with a warning.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping invalid header"),
        }
        self
    }

    /// Set the request body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the client address.
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Attach the signal that fires when the client goes away.
    pub fn with_close_signal(mut self, closed: CloseSignal) -> Self {
        self.closed = closed;
        self
    }
}

/// A response produced by the core, ready to be written by the transport.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OutboundMessage {
    /// A bodiless response with only a status.
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// First value of a header, if it is valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body as lossy UTF-8.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Create a linked close notifier / close signal pair.
///
/// The notifier fires when [`CloseNotifier::close`] is called or when it is
/// dropped, whichever happens first.
pub fn close_signal() -> (CloseNotifier, CloseSignal) {
    let (tx, rx) = watch::channel(false);
    (CloseNotifier { tx }, CloseSignal { rx: Some(rx) })
}

/// Transport-side half of the close signal.
#[derive(Debug)]
pub struct CloseNotifier {
    tx: watch::Sender<bool>,
}

impl CloseNotifier {
    /// Mark the connection as closed.
    pub fn close(&self) {
        self.tx.send_replace(true);
    }
}

impl Drop for CloseNotifier {
    fn drop(&mut self) {
        self.close();
    }
}

/// Core-side half of the close signal.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CloseSignal {
    /// A signal that never fires (in-process callers, tests).
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Check if the connection is already gone.
    pub fn is_closed(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolve once the connection is closed. Pending forever for `never()`.
    pub async fn closed(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            std::future::pending::<()>().await;
            return;
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without an explicit close: the connection is gone too.
                return;
            }
        }
    }
}
