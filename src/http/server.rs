//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router that hands every request to the host
//! - Wire up middleware (tracing, request timeout)
//! - Aggregate bodies up to the configured limit
//! - Tie the request future to a close signal so async work can be
//!   cancelled when the client goes away
//! - Serve until the shutdown broadcast fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::error::HostError;
use crate::host::Host;
use crate::http::message::{close_signal, InboundMessage, OutboundMessage};

/// State injected into the catch-all handler.
#[derive(Clone)]
struct ServerState {
    host: Arc<Host>,
    max_body_bytes: usize,
}

/// HTTP front end of the host.
pub struct HttpServer {
    router: Router,
    host: Arc<Host>,
}

impl HttpServer {
    /// Create a new server in front of `host`.
    pub fn new(host: Arc<Host>) -> Self {
        let router = Self::build_router(&host);
        Self { router, host }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(host: &Arc<Host>) -> Router {
        let config = host.config();
        let state = ServerState {
            host: Arc::clone(host),
            max_body_bytes: config.listener.max_body_bytes,
        };
        Router::new()
            .route("/{*path}", any(host_handler))
            .route("/", any(host_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// The router, for driving the server in-process.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Get the host behind this server.
    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Accept connections on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            applications = self.host.registry().len(),
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all handler: decode, hand to the host, encode.
async fn host_handler(State(state): State<ServerState>, request: Request<Body>) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let (parts, body) = request.into_parts();

    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > state.max_body_bytes) {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(uri = %parts.uri, error = %err, "Request body rejected");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    // Dropped together with this future when the client disconnects.
    let (_notifier, closed) = close_signal();
    let mut message = InboundMessage::new(parts.method, parts.uri.to_string()).with_close_signal(closed);
    message.headers = parts.headers;
    message.body = body;
    message.peer_addr = peer;

    match state.host.handle(message).await {
        Ok(out) => into_response(out),
        Err(HostError::ClientDisconnected) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Host failed to produce a response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn into_response(out: OutboundMessage) -> Response {
    (out.status, out.headers, out.body).into_response()
}
