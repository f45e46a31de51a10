//! Dapper API Binary Entry Point
//!
//! Loads configuration, resolves the database backend and serves the HTTP API.

use clap::Parser;
use dapper_api::{create_router, AppConfig, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Dapper API - user listing over SQL Server or PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "dapper-api", version, about, long_about = None)]
struct Cli {
    /// Path to an additional configuration file
    #[arg(short, long, env = "DAPPER_CONFIG")]
    config: Option<PathBuf>,

    /// Backend selector, "SQL" or "POSTGRES" (overrides config file)
    #[arg(long, env = "DAPPER_DATABASE_USED")]
    database_used: Option<String>,

    /// Server bind address (overrides config file)
    #[arg(long, env = "DAPPER_SERVER__BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "DAPPER_SERVER__PORT")]
    server_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dapper_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(database_used) = cli.database_used {
        config.database.database_used = database_used;
    }
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }

    tracing::info!(
        "Server: {}, Database: {}",
        config.server.address(),
        config.database.database_used,
    );

    let state = AppState::from_settings(&config.database)?;
    let app = create_router(state);

    let addr: SocketAddr = config.server.address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
