//! `isomorph-server`: serve the default isomorph application over HTTP.
//!
//! Configuration comes from the process globals (`DEV`, `WAPP`, ...), an optional
//! TOML file named by `ISOMORPH_CONFIG`, and `HOST`/`PORT`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use isomorph_core::config::{Config, Target};
use isomorph_runtime::Application;
use isomorph_runtime::metrics::MetricsServer;
use isomorph_web::{Server, ServerConfig, ServerError, install_fatal_hook, send};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting isomorph server");

    let config_path = std::env::var_os("ISOMORPH_CONFIG").map(PathBuf::from);
    let server_config =
        ServerConfig::load(config_path.as_deref()).context("loading server configuration")?;
    let app_config = Config::from_env(Target::Server).context("reading process globals")?;
    info!(
        addr = %server_config.addr(),
        wapp = %app_config.globals.wapp,
        dev = app_config.is_dev(),
        metrics = server_config.metrics,
        "Configuration loaded"
    );

    let mut app = Application::new(app_config);
    send::register(&mut app);

    let metrics = if server_config.metrics {
        let mut exporter = MetricsServer::new();
        exporter.start().context("installing the metrics recorder")?;
        exporter.handle().cloned()
    } else {
        None
    };

    let server = Server::bind(&server_config, Arc::new(app), metrics).await?;
    install_fatal_hook(&server.shutdown_handle());

    match server.serve().await {
        Ok(()) => Ok(()),
        Err(ServerError::Fatal(message)) => {
            error!(%message, "Server stopped after a fatal error");
            std::process::exit(1);
        },
        Err(error) => Err(error.into()),
    }
}
