//! WhatsGate - Service entry point

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use whatsgate_api::AppState;
use whatsgate_common::config::{Config, LoggingConfig};
use whatsgate_storage::{DatabasePool, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting WhatsGate...");

    // Initialize storage
    let store = match config.database.backend.as_str() {
        "postgres" => {
            let db_pool = DatabasePool::new(&config.database).await?;
            db_pool.migrate().await?;
            Store::postgres(db_pool)
        }
        "memory" => {
            warn!("Using the in-memory store, data is lost on restart");
            Store::memory()
        }
        other => bail!("Unknown database backend: {}", other),
    };

    if config.api.keys.is_empty() {
        warn!("No API keys configured, every /api/v1 request will be rejected");
    }
    if config.webhook.app_secret.is_none() {
        warn!("webhook.app_secret is not set, webhook signatures are not checked");
    }

    let state = Arc::new(AppState::build(&config, store)?);

    // Start campaign poller
    let poller_handle = {
        let campaigns = state.campaigns.clone();
        tokio::spawn(async move {
            campaigns.run_poller().await;
        })
    };

    // Start health checker
    let health_handle = {
        let health = state.health.clone();
        tokio::spawn(async move {
            health.run().await;
        })
    };

    // Start webhook delivery log pruning
    let log_pruner_handle = {
        let ingestor = state.ingestor.clone();
        tokio::spawn(async move {
            ingestor.run_log_pruner().await;
        })
    };

    // Start API server
    let app = whatsgate_api::create_router(state, &config.api.cors_origins);
    let address = format!("{}:{}", config.server.bind_address, config.api.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind API server on {}", address))?;
    info!("Starting API server on {}", address);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("API server error: {}", e);
    }

    // Cleanup
    poller_handle.abort();
    health_handle.abort();
    log_pruner_handle.abort();

    info!("WhatsGate shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
