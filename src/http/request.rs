//! Request facade over one decoded inbound message.
//!
//! # Responsibilities
//! - Expose method, headers and body of the inbound message
//! - Derive path, query, parameters, cookies, encoding and session id lazily
//! - Hold request-scoped attributes and the async completion context
//! - Bind the request to its owning application (mount prefix, session store)
//!
//! # Design Decisions
//! - Each derived field lives in its own `OnceLock`: computed at most once,
//!   then served from the cache. The facade is owned by one pipeline, so the
//!   cells are never contended.
//! - The body can be viewed once (stream or reader); a second view is an
//!   `IllegalState` error.
//! - Session id precedence: cookie, then URL parameter, then a fresh id.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Bytes;
use axum::http::header::{ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE};
use axum::http::{HeaderMap, Method};

use crate::application::Application;
use crate::dispatch::async_context::AsyncContext;
use crate::dispatch::pattern::is_path_prefix;
use crate::dispatch::DispatchType;
use crate::error::{HostError, HostResult};
use crate::http::body::{decode_text, BodyReader, BodyStream};
use crate::http::cookie::{decode_cookies, find_cookie, Cookie};
use crate::http::date::parse_http_date;
use crate::http::message::InboundMessage;
use crate::http::params::{percent_decode_path, ParameterMap};
use crate::http::response::Response;
use crate::observability::metrics;
use crate::session::Session;

/// Attribute key holding the current [`DispatchType`].
pub const DISPATCHER_TYPE_ATTRIBUTE: &str = "app_host.dispatcher_type";

/// Attribute key holding the path a forward/include was issued from.
pub const FORWARD_PATH_ATTRIBUTE: &str = "app_host.forward.path";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Where the requested session id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionIdSource {
    Cookie,
    Url,
    /// Not supplied by the client; a new id was generated.
    Generated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyAccess {
    Stream,
    Reader,
}

#[derive(Debug)]
struct RequestPaths {
    path: String,
    query: Option<String>,
    request_uri: String,
}

enum Attribute {
    /// Stored "no value"; distinct from the attribute being absent.
    Empty,
    Value(Arc<dyn Any + Send + Sync>),
}

/// The request as seen by filters and handlers.
pub struct Request {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
    peer_addr: Option<SocketAddr>,
    app: Arc<Application>,

    paths: OnceLock<RequestPaths>,
    cookies: OnceLock<Vec<Cookie<'static>>>,
    parameters: OnceLock<ParameterMap>,
    encoding: OnceLock<String>,
    encoding_override: Option<String>,
    locale: OnceLock<Option<String>>,
    session_id: OnceLock<(String, SessionIdSource)>,
    decodes: AtomicUsize,

    session: Option<Arc<Session>>,
    session_created: bool,
    attributes: HashMap<String, Attribute>,
    body_access: Option<BodyAccess>,
    dispatch_path: Option<String>,
    async_context: Option<AsyncContext>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("application", &self.app.name())
            .finish_non_exhaustive()
    }
}

impl Request {
    /// Wrap an inbound message for the given application.
    pub fn new(message: InboundMessage, app: Arc<Application>) -> Self {
        Self {
            method: message.method,
            uri: message.uri,
            headers: message.headers,
            body: message.body,
            peer_addr: message.peer_addr,
            app,
            paths: OnceLock::new(),
            cookies: OnceLock::new(),
            parameters: OnceLock::new(),
            encoding: OnceLock::new(),
            encoding_override: None,
            locale: OnceLock::new(),
            session_id: OnceLock::new(),
            decodes: AtomicUsize::new(0),
            session: None,
            session_created: false,
            attributes: HashMap::new(),
            body_access: None,
            dispatch_path: None,
            async_context: None,
        }
    }

    /// The application serving this request.
    pub fn application(&self) -> &Arc<Application> {
        &self.app
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The raw request target as received.
    pub fn raw_uri(&self) -> &str {
        &self.uri
    }

    /// Address of the client, when the transport knows it.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Number of lazy decode passes performed so far.
    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::Relaxed)
    }

    // --- Headers ---

    /// First value of a header (case-insensitive name).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All values of a header in declaration order.
    pub fn headers(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// Header names in arrival order.
    pub fn header_names(&self) -> Vec<&str> {
        self.headers.keys().map(|k| k.as_str()).collect()
    }

    /// A date header as milliseconds since the epoch.
    ///
    /// Absent or empty headers yield `Ok(None)`; a malformed date is an
    /// `IllegalArgument` error.
    pub fn date_header(&self, name: &str) -> HostResult<Option<i64>> {
        match self.header(name).filter(|v| !v.trim().is_empty()) {
            None => Ok(None),
            Some(value) => parse_http_date(value)
                .map(Some)
                .ok_or_else(|| HostError::IllegalArgument(format!("malformed date header `{}`: {}", name, value))),
        }
    }

    /// An integer header. Malformed values are an `IllegalArgument` error.
    pub fn int_header(&self, name: &str) -> HostResult<Option<i64>> {
        match self.header(name) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| HostError::IllegalArgument(format!("malformed integer header `{}`: {}", name, value))),
        }
    }

    /// The `Content-Type` header, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    /// Body length in bytes.
    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    // --- Paths ---

    fn paths(&self) -> &RequestPaths {
        self.paths.get_or_init(|| {
            self.decodes.fetch_add(1, Ordering::Relaxed);
            split_target(&self.uri, self.app.mount())
        })
    }

    /// Mount prefix of the owning application (`""` for the root application).
    pub fn context_path(&self) -> &str {
        self.app.mount()
    }

    /// Decoded path below the mount prefix, always starting with `/`.
    ///
    /// During a forward or include this is the target path.
    pub fn path(&self) -> &str {
        match &self.dispatch_path {
            Some(path) => path,
            None => &self.paths().path,
        }
    }

    /// Raw query string, without the `?`.
    pub fn query_string(&self) -> Option<&str> {
        self.paths().query.as_deref()
    }

    /// Raw request path including the mount prefix, without the query.
    pub fn request_uri(&self) -> &str {
        &self.paths().request_uri
    }

    // --- Parameters ---

    /// Decoded parameters. The query string is always decoded; a form body
    /// is added only when the application enables body decoding.
    pub fn parameters(&self) -> &ParameterMap {
        self.parameters.get_or_init(|| {
            self.decodes.fetch_add(1, Ordering::Relaxed);
            let mut map = self
                .paths()
                .query
                .as_deref()
                .map(|q| ParameterMap::from_urlencoded(q.as_bytes()))
                .unwrap_or_default();
            if self.decodes_form_body() {
                map.extend(ParameterMap::from_urlencoded(&self.body));
            }
            map
        })
    }

    fn decodes_form_body(&self) -> bool {
        self.app.settings().dispatch.decode_form_body
            && self.method != Method::GET
            && self.method != Method::HEAD
            && self.body_access.is_none()
            && self
                .content_type()
                .map(|ct| {
                    ct.split(';')
                        .next()
                        .unwrap_or_default()
                        .trim()
                        .eq_ignore_ascii_case(FORM_CONTENT_TYPE)
                })
                .unwrap_or(false)
    }

    /// First value of a parameter.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters().get(name)
    }

    /// All values of a parameter, in arrival order.
    pub fn parameter_values(&self, name: &str) -> &[String] {
        self.parameters().values(name)
    }

    /// Parameter names in first-seen order.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters().names().collect()
    }

    // --- Cookies, encoding, locale ---

    /// Cookies sent by the client, decoded on first use.
    pub fn cookies(&self) -> &[Cookie<'static>] {
        self.cookies.get_or_init(|| {
            self.decodes.fetch_add(1, Ordering::Relaxed);
            self.headers
                .get_all(COOKIE)
                .iter()
                .filter_map(|v| match v.to_str() {
                    Ok(s) => Some(s),
                    Err(_) => {
                        tracing::debug!("Skipping non-ASCII cookie header");
                        None
                    }
                })
                .flat_map(decode_cookies)
                .collect()
        })
    }

    /// First cookie with the given name.
    pub fn cookie(&self, name: &str) -> Option<&Cookie<'static>> {
        find_cookie(self.cookies(), name)
    }

    /// Charset from the content type, else the application default.
    pub fn character_encoding(&self) -> &str {
        if let Some(encoding) = &self.encoding_override {
            return encoding;
        }
        self.encoding.get_or_init(|| {
            self.decodes.fetch_add(1, Ordering::Relaxed);
            self.content_type()
                .and_then(charset_of)
                .unwrap_or_else(|| self.app.settings().dispatch.default_encoding.clone())
        })
    }

    /// Override the charset used to decode the body.
    pub fn set_character_encoding(&mut self, encoding: impl Into<String>) {
        self.encoding_override = Some(encoding.into());
    }

    /// Primary language tag from `Accept-Language`.
    pub fn locale(&self) -> Option<&str> {
        self.locale
            .get_or_init(|| {
                self.header(ACCEPT_LANGUAGE.as_str()).and_then(|value| {
                    let tag = value.split(',').next()?.split(';').next()?.trim();
                    (!tag.is_empty()).then(|| tag.to_string())
                })
            })
            .as_deref()
    }

    // --- Body ---

    fn claim_body(&mut self, access: BodyAccess) -> HostResult<()> {
        if let Some(previous) = self.body_access {
            return Err(HostError::illegal_state(format!(
                "request body already consumed via {:?}",
                previous
            )));
        }
        self.body_access = Some(access);
        Ok(())
    }

    /// Raw byte view of the body. Only one body view per request.
    pub fn input_stream(&mut self) -> HostResult<BodyStream> {
        self.claim_body(BodyAccess::Stream)?;
        Ok(BodyStream::new(self.body.clone()))
    }

    /// Text view of the body decoded with [`Request::character_encoding`].
    pub fn reader(&mut self) -> HostResult<BodyReader> {
        self.claim_body(BodyAccess::Reader)?;
        let text = decode_text(&self.body, self.character_encoding());
        Ok(BodyReader::new(text))
    }

    // --- Attributes ---

    /// Get a typed attribute. `None` if absent, empty or of another type.
    pub fn attribute<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        match self.attributes.get(name)? {
            Attribute::Value(value) => Arc::clone(value).downcast::<T>().ok(),
            Attribute::Empty => None,
        }
    }

    /// Store an attribute. `None` stores an explicit empty value, which
    /// still counts as present for [`Request::has_attribute`].
    pub fn set_attribute<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: Option<T>) {
        let slot = match value {
            Some(value) => Attribute::Value(Arc::new(value)),
            None => Attribute::Empty,
        };
        self.attributes.insert(name.into(), slot);
    }

    /// Check if an attribute is set, even to an empty value.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Remove an attribute. Returns whether it was set.
    pub fn remove_attribute(&mut self, name: &str) -> bool {
        self.attributes.remove(name).is_some()
    }

    pub fn attribute_names(&self) -> Vec<&str> {
        self.attributes.keys().map(String::as_str).collect()
    }

    // --- Dispatch state ---

    /// How the request reached the current handler.
    pub fn dispatch_type(&self) -> DispatchType {
        self.attribute::<DispatchType>(DISPATCHER_TYPE_ATTRIBUTE)
            .map(|t| *t)
            .unwrap_or(DispatchType::Request)
    }

    pub(crate) fn set_dispatch_type(&mut self, dispatch_type: DispatchType) {
        self.set_attribute(DISPATCHER_TYPE_ATTRIBUTE, Some(dispatch_type));
    }

    /// Override the path seen by handlers; returns the previous override.
    pub(crate) fn replace_dispatch_path(&mut self, path: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.dispatch_path, path)
    }

    /// Forward to another path of the same application.
    pub async fn forward(&mut self, path: &str, response: &Response) -> HostResult<()> {
        let app = Arc::clone(&self.app);
        app.dispatcher().forward(self, response, path).await
    }

    /// Include the output of another path of the same application.
    pub async fn include(&mut self, path: &str, response: &Response) -> HostResult<()> {
        let app = Arc::clone(&self.app);
        app.dispatcher().include(self, response, path).await
    }

    // --- Sessions ---

    fn resolve_session_id(&self) -> &(String, SessionIdSource) {
        self.session_id.get_or_init(|| {
            let config = &self.app.settings().session;
            if let Some(id) = self
                .cookie(&config.cookie_name)
                .map(Cookie::value_trimmed)
                .filter(|v| !v.is_empty())
            {
                return (id.to_string(), SessionIdSource::Cookie);
            }
            if let Some(value) = self.parameter(&config.url_parameter).filter(|v| !v.is_empty()) {
                return (value.to_string(), SessionIdSource::Url);
            }
            (generate_session_id(), SessionIdSource::Generated)
        })
    }

    /// The session id this request refers to. Fixed once resolved.
    pub fn requested_session_id(&self) -> &str {
        &self.resolve_session_id().0
    }

    /// Where the requested session id came from.
    pub fn session_id_source(&self) -> SessionIdSource {
        self.resolve_session_id().1
    }

    /// Check if the session id came from a cookie.
    pub fn is_requested_session_id_from_cookie(&self) -> bool {
        self.session_id_source() == SessionIdSource::Cookie
    }

    /// Check if the session id came from the URL.
    pub fn is_requested_session_id_from_url(&self) -> bool {
        self.session_id_source() == SessionIdSource::Url
    }

    /// True when the client supplied the id (cookie or URL).
    pub fn is_requested_session_id_valid(&self) -> bool {
        self.session_id_source() != SessionIdSource::Generated
    }

    /// The session for this request, creating it when `create` is set.
    pub fn session(&mut self, create: bool) -> Option<Arc<Session>> {
        if let Some(session) = self.session.as_ref().filter(|s| s.is_valid()) {
            return Some(Arc::clone(session));
        }
        let id = self.requested_session_id().to_string();
        let app = Arc::clone(&self.app);
        let session = if create {
            let (session, created) = app.sessions().get_or_create(&id);
            if created {
                self.session_created = true;
                metrics::record_session_created(app.name());
            }
            Some(session)
        } else {
            app.sessions().get(&id)
        };
        self.session = session.clone();
        session
    }

    /// True if this request created its session.
    pub fn session_created(&self) -> bool {
        self.session_created
    }

    // --- Async ---

    /// Switch to asynchronous completion with the application's default timeout.
    pub fn start_async(&mut self, response: &Response) -> HostResult<AsyncContext> {
        let timeout = self.app.settings().dispatch.async_timeout();
        self.start_async_with_timeout(response, timeout)
    }

    /// Switch to asynchronous completion with an explicit timeout.
    ///
    /// Restarting is only legal from an async-resumed dispatch.
    pub fn start_async_with_timeout(
        &mut self,
        response: &Response,
        timeout: Duration,
    ) -> HostResult<AsyncContext> {
        if let Some(ctx) = &self.async_context {
            ctx.restart(timeout)?;
            return Ok(ctx.clone());
        }
        let ctx = AsyncContext::new(response.clone(), timeout);
        self.async_context = Some(ctx.clone());
        Ok(ctx)
    }

    /// The async context, once async was started.
    pub fn async_context(&self) -> Option<&AsyncContext> {
        self.async_context.as_ref()
    }

    /// Check if an async context is pending.
    pub fn is_async_started(&self) -> bool {
        self.async_context
            .as_ref()
            .map(AsyncContext::is_pending)
            .unwrap_or(false)
    }
}

/// Split a raw request target into mount-relative path, query and request URI.
fn split_target(uri: &str, mount: &str) -> RequestPaths {
    let target = strip_authority(uri);
    let (raw_path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (target, None),
    };
    let relative = if !mount.is_empty() && is_path_prefix(raw_path, mount) {
        &raw_path[mount.len()..]
    } else {
        raw_path
    };
    let mut path = percent_decode_path(relative);
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    RequestPaths {
        path,
        query,
        request_uri: raw_path.to_string(),
    }
}

/// Raw path of a request target: no scheme, authority or query.
pub(crate) fn target_path(uri: &str) -> &str {
    let target = strip_authority(uri);
    target.split('?').next().unwrap_or(target)
}

fn strip_authority(uri: &str) -> &str {
    let Some(rest) = uri
        .strip_prefix("http://")
        .or_else(|| uri.strip_prefix("https://"))
    else {
        return uri;
    };
    match rest.find(['/', '?']) {
        Some(i) if rest[i..].starts_with('/') => &rest[i..],
        _ => "/",
    }
}

fn charset_of(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// 32 lowercase hex characters.
fn generate_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
