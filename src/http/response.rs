//! Response sink handed to handlers.
//!
//! # Responsibilities
//! - Buffer status, headers and body produced by filters and handlers
//! - Hand the result to the transport exactly once (`flush`)
//! - Stay usable from a different task when a request completes asynchronously
//!
//! # Design Decisions
//! - Cheap to clone: all clones share one buffer behind a mutex
//! - Every mutation after `flush` fails with `IllegalState`
//! - `discard` drops the pending buffer on cancellation paths

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::body::Bytes;
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::error::{HostError, HostResult};
use crate::http::cookie::Cookie;
use crate::http::message::OutboundMessage;

#[derive(Debug)]
struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    committed: bool,
    /// Content is final but not yet handed to the transport.
    sealed: bool,
}

/// Shared, buffered response for one request.
#[derive(Debug, Clone)]
pub struct Response {
    inner: Arc<Mutex<ResponseState>>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    /// Create an empty `200 OK` response.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ResponseState {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Vec::new(),
                committed: false,
                sealed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResponseState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_open(&self) -> HostResult<MutexGuard<'_, ResponseState>> {
        let state = self.lock();
        if state.committed {
            return Err(HostError::illegal_state("response already flushed"));
        }
        if state.sealed {
            return Err(HostError::illegal_state("response already closed"));
        }
        Ok(state)
    }

    /// Current status code.
    pub fn status(&self) -> StatusCode {
        self.lock().status
    }

    /// Set the status code.
    pub fn set_status(&self, status: StatusCode) -> HostResult<()> {
        self.lock_open()?.status = status;
        Ok(())
    }

    /// Replace all values of a header.
    pub fn set_header(&self, name: &str, value: &str) -> HostResult<()> {
        let (name, value) = header_pair(name, value)?;
        self.lock_open()?.headers.insert(name, value);
        Ok(())
    }

    /// Add a value to a header, keeping existing ones.
    pub fn add_header(&self, name: &str, value: &str) -> HostResult<()> {
        let (name, value) = header_pair(name, value)?;
        self.lock_open()?.headers.append(name, value);
        Ok(())
    }

    /// First value of a response header.
    pub fn header(&self, name: &str) -> Option<String> {
        self.lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// Set the `Content-Type` header.
    pub fn set_content_type(&self, content_type: &str) -> HostResult<()> {
        self.set_header(CONTENT_TYPE.as_str(), content_type)
    }

    /// Append a `Set-Cookie` header.
    pub fn add_cookie(&self, cookie: &Cookie<'_>) -> HostResult<()> {
        self.add_header(SET_COOKIE.as_str(), &cookie.to_string())
    }

    /// Append bytes to the body.
    pub fn write(&self, data: &[u8]) -> HostResult<()> {
        self.lock_open()?.body.extend_from_slice(data);
        Ok(())
    }

    /// Append text to the body.
    pub fn write_str(&self, text: &str) -> HostResult<()> {
        self.write(text.as_bytes())
    }

    /// Bytes written so far.
    pub fn buffered_len(&self) -> usize {
        self.lock().body.len()
    }

    /// Clear the body, keeping status and headers.
    pub fn reset_buffer(&self) -> HostResult<()> {
        self.lock_open()?.body.clear();
        Ok(())
    }

    /// Replace the response with an error status and a plain-text message.
    pub fn send_error(&self, status: StatusCode, message: &str) -> HostResult<()> {
        let mut state = self.lock_open()?;
        state.status = status;
        state.body.clear();
        state.body.extend_from_slice(message.as_bytes());
        state.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Ok(())
    }

    /// Like [`Response::send_error`], but later writes are rejected. The
    /// response can still be flushed.
    pub fn close_with_error(&self, status: StatusCode, message: &str) -> HostResult<()> {
        self.send_error(status, message)?;
        self.lock().sealed = true;
        Ok(())
    }

    /// Check if the response was flushed or discarded.
    pub fn is_committed(&self) -> bool {
        self.lock().committed
    }

    /// Flush and close. Callable once; later calls fail with `IllegalState`.
    pub fn flush(&self) -> HostResult<OutboundMessage> {
        let mut state = self.lock();
        if state.committed {
            return Err(HostError::illegal_state("response already flushed"));
        }
        state.committed = true;
        Ok(OutboundMessage {
            status: state.status,
            headers: std::mem::take(&mut state.headers),
            body: Bytes::from(std::mem::take(&mut state.body)),
        })
    }

    /// Drop pending output and close the sink without producing a message.
    pub fn discard(&self) {
        let mut state = self.lock();
        state.committed = true;
        state.body = Vec::new();
        state.headers.clear();
    }
}

fn header_pair(name: &str, value: &str) -> HostResult<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| HostError::IllegalArgument(format!("invalid header name `{}`", name)))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| HostError::IllegalArgument(format!("invalid value for header `{}`", name)))?;
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_happens_once() {
        let response = Response::new();
        response.set_status(StatusCode::CREATED).unwrap();
        response.add_header("x-a", "1").unwrap();
        response.add_header("x-a", "2").unwrap();
        response.write_str("hello").unwrap();

        let out = response.flush().unwrap();
        assert_eq!(out.status, StatusCode::CREATED);
        assert_eq!(out.headers.get_all("x-a").iter().count(), 2);
        assert_eq!(out.body_text(), "hello");

        assert!(response.flush().unwrap_err().is_illegal_state());
        assert!(response.write_str("late").unwrap_err().is_illegal_state());
    }

    #[test]
    fn clones_share_the_buffer() {
        let response = Response::new();
        let other = response.clone();
        other.write_str("from elsewhere").unwrap();
        assert_eq!(response.buffered_len(), 14);
    }

    #[test]
    fn send_error_replaces_body() {
        let response = Response::new();
        response.write_str("partial").unwrap();
        response.send_error(StatusCode::NOT_FOUND, "missing").unwrap();
        let out = response.flush().unwrap();
        assert_eq!(out.status, StatusCode::NOT_FOUND);
        assert_eq!(out.body_text(), "missing");
    }

    #[test]
    fn closed_response_rejects_writes_but_flushes() {
        let response = Response::new();
        response.close_with_error(StatusCode::INTERNAL_SERVER_ERROR, "gone").unwrap();
        assert!(response.write_str("late").unwrap_err().is_illegal_state());
        assert!(response.set_status(StatusCode::OK).unwrap_err().is_illegal_state());

        let out = response.flush().unwrap();
        assert_eq!(out.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(out.body_text(), "gone");
    }

    #[test]
    fn invalid_header_is_illegal_argument() {
        let response = Response::new();
        let err = response.set_header("bad name", "x").unwrap_err();
        assert!(matches!(err, HostError::IllegalArgument(_)));
    }
}
