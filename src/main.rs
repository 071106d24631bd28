//! `app-host` binary: load configuration, deploy applications, serve.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use app_host::application::HandlerCatalog;
use app_host::http::HttpServer;
use app_host::lifecycle::signals::spawn_signal_listener;
use app_host::lifecycle::startup::{bind_listener, build_host, load_or_default};
use app_host::lifecycle::Shutdown;
use app_host::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "app-host", version, about = "Multi-tenant HTTP application host")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_or_default(cli.config.as_deref())?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "app-host starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        workers_per_application = config.pool.workers_per_application,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let host = Arc::new(build_host(config, HandlerCatalog::new())?);
    let listener = bind_listener(host.config()).await?;

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    let server = HttpServer::new(Arc::clone(&host));
    server.run(listener, shutdown.subscribe()).await?;

    host.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
