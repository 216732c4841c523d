//! Parcel server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use parcel_core::config::AppConfig;
use parcel_server::{AppState, create_router};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parcel - a file-sharing server with resumable uploads
#[derive(Parser, Debug)]
#[command(name = "parceld")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PARCEL_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sqlx=warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config: AppConfig = Figment::new()
        .merge(Toml::file(&args.config))
        .merge(Env::prefixed("PARCEL_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .server
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid server configuration")?;

    let storage = parcel_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage backend")?;
    storage
        .health_check()
        .await
        .context("storage backend health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend ready");

    let metadata = parcel_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .migrate()
        .await
        .context("failed to run database migrations")?;

    let bind = config.server.bind.clone();
    let state = AppState::new(config, storage, metadata);

    // Crash recovery: reap sessions that expired while down and rearm
    // timers for everything still live.
    let recovery = state
        .uploads
        .recover()
        .await
        .context("session recovery failed")?;
    tracing::info!(
        expired = recovery.expired,
        rearmed = recovery.rearmed,
        "Session recovery finished"
    );

    let _sweeper = state.uploads.clone().spawn_sweeper();

    let router = create_router(state);
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address: {bind}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, "Parcel server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install shutdown signal handler");
        return;
    }
    tracing::info!("Shutdown signal received");
}
