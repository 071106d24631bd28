//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the host.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::descriptor::UnitDescriptor;

/// Root configuration for the application host.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HostConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Session cookie and expiry settings.
    pub session: SessionConfig,

    /// Dispatcher defaults shared by all applications.
    pub dispatch: DispatchConfig,

    /// Per-application worker pool sizing.
    pub pool: PoolConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Applications deployed at startup.
    pub applications: Vec<UnitDescriptor>,
}

impl HostConfig {
    /// Settings handed to every application entry.
    pub fn app_settings(&self) -> AppSettings {
        AppSettings {
            session: self.session.clone(),
            dispatch: self.dispatch.clone(),
            pool: self.pool.clone(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest request body the transport aggregates, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 512 * 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Transport-level request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Session cookie and expiry settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the session-id cookie.
    pub cookie_name: String,

    /// Name of the session-id URL parameter.
    pub url_parameter: String,

    /// Cookie `Max-Age` in seconds; -1 for a session-only cookie.
    pub max_age_secs: i64,

    /// Idle minutes before a session expires; zero or less never expires.
    pub timeout_minutes: i64,

    /// Background sweep period in seconds; 0 disables the sweep.
    pub sweep_interval_secs: u64,
}

impl SessionConfig {
    /// Idle limit for sessions; `None` when they never expire.
    pub fn max_idle(&self) -> Option<Duration> {
        (self.timeout_minutes > 0).then(|| Duration::from_secs(self.timeout_minutes as u64 * 60))
    }

    /// Cookie `Max-Age`, or `None` for a session-only cookie.
    pub fn max_age(&self) -> Option<i64> {
        (self.max_age_secs >= 0).then_some(self.max_age_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "JSESSIONID".to_string(),
            url_parameter: "jsessionid".to_string(),
            max_age_secs: -1,
            timeout_minutes: 30,
            sweep_interval_secs: 60,
        }
    }
}

/// Dispatcher defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Character encoding used when the content type names none.
    pub default_encoding: String,

    /// Default async completion timeout in milliseconds.
    pub async_timeout_ms: u64,

    /// Decode `application/x-www-form-urlencoded` bodies into parameters.
    pub decode_form_body: bool,

    /// Serve `resource_root` as the default handler when a unit has none.
    pub register_default_handler: bool,
}

impl DispatchConfig {
    /// Default deadline for async requests.
    pub fn async_timeout(&self) -> Duration {
        Duration::from_millis(self.async_timeout_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_encoding: "UTF-8".to_string(),
            async_timeout_ms: 30_000,
            decode_form_body: false,
            register_default_handler: true,
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Concurrent requests per application.
    pub workers_per_application: usize,

    /// Seconds to wait for in-flight requests on unload.
    pub drain_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers_per_application: 50,
            drain_timeout_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// The slice of configuration each application entry carries.
#[derive(Debug, Clone, Default)]
pub struct AppSettings {
    pub session: SessionConfig,
    pub dispatch: DispatchConfig,
    pub pool: PoolConfig,
}
