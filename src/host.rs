//! Host facade: the registry plus the configuration it was built from.
//!
//! The transport adapter only ever talks to [`Host::handle`]; deployment
//! goes through `deploy*` and `undeploy`.

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;

use crate::application::{Application, ApplicationRegistry, DeploymentUnit, HandlerCatalog, UnitDescriptor};
use crate::config::HostConfig;
use crate::error::HostResult;
use crate::http::message::{InboundMessage, OutboundMessage};
use crate::observability::metrics;

/// Label used for requests no application owns.
const UNROUTED: &str = "none";

/// A running application host.
#[derive(Debug)]
pub struct Host {
    config: Arc<HostConfig>,
    registry: ApplicationRegistry,
    catalog: HandlerCatalog,
}

impl Host {
    /// Create a new host with an empty handler catalog.
    pub fn new(config: HostConfig) -> Self {
        Self::with_catalog(config, HandlerCatalog::new())
    }

    /// A host whose descriptors may name the kinds registered in `catalog`.
    pub fn with_catalog(config: HostConfig, catalog: HandlerCatalog) -> Self {
        let registry = ApplicationRegistry::new(config.app_settings());
        Self {
            config: Arc::new(config),
            registry,
            catalog,
        }
    }

    /// Get the host configuration.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Get the application registry.
    pub fn registry(&self) -> &ApplicationRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &HandlerCatalog {
        &self.catalog
    }

    /// Load a unit built in code.
    pub fn deploy(&self, unit: DeploymentUnit) -> HostResult<Arc<Application>> {
        self.registry.load(unit)
    }

    /// Load a unit described in configuration.
    pub fn deploy_descriptor(&self, descriptor: &UnitDescriptor) -> HostResult<Arc<Application>> {
        self.registry.load_descriptor(descriptor, &self.catalog)
    }

    /// Deploy every application listed in the configuration.
    ///
    /// Stops at the first unit that fails to load; units loaded before it
    /// stay deployed.
    pub fn deploy_configured(&self) -> HostResult<usize> {
        for descriptor in &self.config.applications {
            self.deploy_descriptor(descriptor)?;
        }
        Ok(self.config.applications.len())
    }

    /// Unload the application mounted at `mount`.
    pub async fn undeploy(&self, mount: &str) -> HostResult<()> {
        self.registry.unload(mount).await
    }

    /// Route one inbound message to its application.
    ///
    /// Errors only when the client went away before the response existed.
    pub async fn handle(&self, message: InboundMessage) -> HostResult<OutboundMessage> {
        let started = Instant::now();
        match self.registry.resolve_entry(&message.uri) {
            Some(app) => app.serve(message).await,
            None => {
                tracing::debug!(uri = %message.uri, "No application owns request");
                metrics::record_request(UNROUTED, StatusCode::NOT_FOUND.as_u16(), started);
                Ok(OutboundMessage::status(StatusCode::NOT_FOUND))
            }
        }
    }

    /// Unload every application.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Handler;
    use crate::http::request::Request;
    use crate::http::response::Response;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Handler for Named {
        async fn handle(&self, _request: &mut Request, response: &Response) -> HostResult<()> {
            response.write_str(self.0)
        }
    }

    fn host() -> Host {
        let mut config = HostConfig::default();
        config.session.sweep_interval_secs = 0;
        Host::new(config)
    }

    #[tokio::test]
    async fn routes_by_mount_and_404s_the_rest() {
        let host = host();
        host.deploy(DeploymentUnit::new("app1").handler("hello", Named("one"), &["/hello"]))
            .unwrap();

        let out = host.handle(InboundMessage::get("/app1/hello")).await.unwrap();
        assert_eq!(out.status, StatusCode::OK);
        assert_eq!(out.body_text(), "one");

        let out = host.handle(InboundMessage::get("/app2/hello")).await.unwrap();
        assert_eq!(out.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deploys_configured_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "static a").unwrap();

        let mut config = HostConfig::default();
        config.session.sweep_interval_secs = 0;
        config.applications.push(UnitDescriptor {
            name: "docs.war".into(),
            resource_root: Some(dir.path().to_path_buf()),
            ..UnitDescriptor::default()
        });
        let host = Host::new(config);
        assert_eq!(host.deploy_configured().unwrap(), 1);

        let out = host.handle(InboundMessage::get("/docs/a.txt")).await.unwrap();
        assert_eq!(out.body_text(), "static a");
        assert_eq!(out.header("content-type"), Some("text/plain; charset=utf-8"));

        host.undeploy("/docs").await.unwrap();
        let out = host.handle(InboundMessage::get("/docs/a.txt")).await.unwrap();
        assert_eq!(out.status, StatusCode::NOT_FOUND);
    }
}
