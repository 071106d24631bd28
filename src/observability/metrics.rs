//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define host metrics (requests, latency, sessions, async outcomes)
//! - Expose a Prometheus-compatible endpoint when enabled
//!
//! # Metrics
//! - `app_host_requests_total` (counter): requests by application, status
//! - `app_host_request_duration_seconds` (histogram): latency per application
//! - `app_host_sessions_created_total` (counter): sessions created per application
//! - `app_host_sessions_active` (gauge): live sessions per application
//! - `app_host_async_outcomes_total` (counter): async completions by outcome
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; with no recorder
//!   installed every call is a no-op
//! - Labels are application names, never paths

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::dispatch::AsyncOutcome;

/// Record one finished request.
pub fn record_request(application: &str, status: u16, started: Instant) {
    counter!(
        "app_host_requests_total",
        "application" => application.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("app_host_request_duration_seconds", "application" => application.to_string())
        .record(started.elapsed().as_secs_f64());
}

/// Count a newly created session.
pub fn record_session_created(application: &str) {
    counter!("app_host_sessions_created_total", "application" => application.to_string()).increment(1);
}

/// Set the live session gauge of an application.
pub fn record_sessions_active(application: &str, count: usize) {
    gauge!("app_host_sessions_active", "application" => application.to_string()).set(count as f64);
}

/// Count how an async request ended.
pub fn record_async_outcome(application: &str, outcome: AsyncOutcome) {
    counter!(
        "app_host_async_outcomes_total",
        "application" => application.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Install the Prometheus recorder and its HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(err) => tracing::error!(address = %addr, error = %err, "Failed to install metrics exporter"),
    }
}
