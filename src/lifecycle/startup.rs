//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Deploy the configured applications
//! - Bind the listener last, once every application is routable
//!
//! # Design Decisions
//! - Fail fast: a unit that fails to load aborts startup
//! - Steps run in order, not concurrently

use std::path::Path;

use tokio::net::TcpListener;

use crate::application::HandlerCatalog;
use crate::config::{load_config, ConfigError, HostConfig};
use crate::error::{HostError, HostResult};
use crate::host::Host;

/// Read the configuration file, or use defaults when none is given.
pub fn load_or_default(path: Option<&Path>) -> Result<HostConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => Ok(HostConfig::default()),
    }
}

/// Build a host and deploy every configured application.
pub fn build_host(config: HostConfig, catalog: HandlerCatalog) -> HostResult<Host> {
    let host = Host::with_catalog(config, catalog);
    let deployed = host.deploy_configured()?;
    tracing::info!(
        applications = deployed,
        mounts = ?host.registry().mounts(),
        "Applications deployed"
    );
    Ok(host)
}

/// Bind the configured listener address.
pub async fn bind_listener(config: &HostConfig) -> HostResult<TcpListener> {
    let listener = TcpListener::bind(&config.listener.bind_address).await.map_err(|err| {
        HostError::Io(std::io::Error::new(
            err.kind(),
            format!("cannot bind {}: {}", config.listener.bind_address, err),
        ))
    })?;
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{HandlerDescriptor, UnitDescriptor};

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_or_default(None).unwrap();
        assert_eq!(config.listener.bind_address, HostConfig::default().listener.bind_address);
    }

    #[tokio::test]
    async fn unknown_kind_aborts_startup() {
        let mut config = HostConfig::default();
        config.applications.push(UnitDescriptor {
            name: "app".into(),
            handlers: vec![HandlerDescriptor {
                name: "h".into(),
                kind: "missing".into(),
                url_patterns: vec!["/h".into()],
                ..HandlerDescriptor::default()
            }],
            ..UnitDescriptor::default()
        });
        let err = build_host(config, HandlerCatalog::new()).unwrap_err();
        assert!(matches!(err, HostError::Lifecycle { .. }));
    }

    #[tokio::test]
    async fn binds_ephemeral_port() {
        let mut config = HostConfig::default();
        config.listener.bind_address = "127.0.0.1:0".into();
        let listener = bind_listener(&config).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
