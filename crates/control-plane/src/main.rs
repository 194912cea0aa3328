// Timekeeper API server
// Decision: One process hosts the HTTP API and the worker pool over a shared in-memory store

use std::sync::Arc;

use anyhow::{Context, Result};
use timekeeper_control_plane::{api, build_router, Config};
use timekeeper_core::{PollingService, ReqwestHttpClient};
use timekeeper_durable::prelude::InMemoryWorkflowEventStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine; real environment variables take precedence
    dotenvy::dotenv().ok();

    // RUST_LOG overrides the default filter
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("timekeeper=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("timekeeper-control-plane starting...");

    let config = Config::from_env().context("Invalid configuration")?;
    tracing::info!(
        worker_id = %config.worker_id,
        max_concurrent_tasks = config.max_concurrent_tasks,
        public_base_url = %config.public_base_url,
        "Configuration loaded"
    );

    let store = Arc::new(InMemoryWorkflowEventStore::new());
    let service = Arc::new(PollingService::new(
        store,
        Arc::new(ReqwestHttpClient::new()),
        config.worker_pool(),
    ));
    service.run().context("Failed to start worker pool")?;

    let state = api::timers::AppState::new(Arc::clone(&service), config.public_base_url.clone());
    let app = build_router(state, &config.cors_allowed_origins);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("HTTP server stopped, draining workers");
    service.shutdown().await.context("Worker shutdown failed")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
