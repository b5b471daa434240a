//! Aerolens Binary Entry Point
//!
//! Serves the metrics of one Aerospike node over HTTP.
//! Core functionality is provided by the `aerolens` library crate.

use std::net::SocketAddr;
use std::sync::Arc;

use aerolens::{
    ConnectionPolicy, NodeConnector, Observer,
    config::{AppConfig, ConfigError, LogConfig, LogFormat},
    server::{AppState, create_router},
};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Aerolens - Aerospike node exporter
#[derive(Parser, Debug)]
#[command(name = "aerolens", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "AEROLENS_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "AEROLENS_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "AEROLENS_SERVER_PORT")]
    server_port: Option<u16>,

    /// Node host (overrides config file)
    #[arg(long, env = "AEROLENS_NODE_HOST")]
    node_host: Option<String>,

    /// Node port (overrides config file)
    #[arg(long, env = "AEROLENS_NODE_PORT")]
    node_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&LogConfig::default());
            tracing::error!(path = %cli.config, error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    init_tracing(&config.log);
    tracing::info!("Aerolens - Aerospike node exporter");
    tracing::info!(
        "Server: {}:{}{}, Node: {}",
        config.server.bind,
        config.server.port,
        config.server.metrics_path,
        config.aerospike.address(),
    );

    // TLS material and auth mode are checked here; any error is fatal.
    let policy = match ConnectionPolicy::from_config(&config.aerospike) {
        Ok(policy) => policy,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build connection policy");
            std::process::exit(1);
        }
    };

    let observer = Observer::new(NodeConnector::new(policy))?;

    let app_state = AppState {
        scraper: Arc::new(observer),
    };
    let app = create_router(app_state, &config.server.metrics_path);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    tracing::info!(
        "Metrics available at: http://{}{}",
        addr,
        config.server.metrics_path
    );
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Load the configuration file and apply CLI/env overrides (CLI > ENV > config file).
fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::load(&cli.config)?;

    if let Some(bind) = &cli.server_bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(host) = &cli.node_host {
        config.aerospike.host = host.clone();
    }
    if let Some(port) = cli.node_port {
        config.aerospike.port = port;
    }

    config.validate()?;
    Ok(config)
}

/// Install the global subscriber; `RUST_LOG` wins over the configured level.
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);

    match log.format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

/// Setup graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
