//! Image Optimizer - resizing and re-encoding proxy
//!
//! Fetches remote images, resizes and re-encodes them on request, and keeps
//! the results in a sharded on-disk cache that a background sweeper trims.

mod config;
mod error;
mod fetcher;
mod processor;
mod server;
mod transform;
mod types;
mod validation;

use crate::config::ServiceConfig;
use crate::error::{OptimizerError, Result};
use crate::fetcher::HttpFetcher;
use crate::processor::ImageProcessor;
use crate::server::{cors_layer, start_server, ServerState, SharedState};
use image_cache::{CacheStore, Sweeper};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("image_optimizer=info".parse()?)
        .add_directive("image_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Image Optimizer...");

    let config = ServiceConfig::from_env();
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache.root);
    info!("Cache TTL: {:?}", config.cache.ttl);
    info!("Sweep interval: {:?}", config.cache.sweep_interval);
    info!("CORS origins: {:?}", config.cors_origins);

    let store = CacheStore::new(&config.cache);
    store.init().await?;

    let fetcher = HttpFetcher::new()?;
    let processor = ImageProcessor::new(store, Arc::new(fetcher));
    let sweeper = Sweeper::new(&config.cache);

    let shutdown = CancellationToken::new();
    let sweeper_task = tokio::spawn(sweeper.clone().run(shutdown.child_token()));
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let state: SharedState = Arc::new(ServerState::new(processor, sweeper));

    // Serves until a shutdown signal arrives
    let served = start_server(
        state,
        config.port,
        cors_layer(&config.cors_origins),
        shutdown.clone(),
    )
    .await;

    shutdown.cancel();
    if let Err(e) = sweeper_task.await {
        warn!(error = %e, "Sweeper task ended abnormally");
    }

    served.map_err(|e| OptimizerError::Config(format!("Server error: {}", e)))?;
    info!("Shutdown complete");
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }

    shutdown.cancel();
}
