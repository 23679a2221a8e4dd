//! Keyward Server - activation lifecycle and signature verification engine
//!
//! Starts the storage backend, the unique value sweep and the health/readiness
//! listener:
//! - GET /health - Service status and storage backend
//! - GET /ready  - Readiness probe

use std::sync::Arc;

use keyward_server::tasks::spawn_unique_value_cleanup;
use keyward_server::{create_router, AppState, Config, Storage, TracingNotifier};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyward_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        lookahead = config.signature_validation_lookahead,
        max_failed_attempts = config.max_failed_attempts,
        replay_verification = ?config.replay_verification,
        instance_id = %config.instance_id,
        "Configuration loaded"
    );

    let storage = Storage::from_config(&config).await?;
    let addr = config.socket_addr();
    let state = AppState::build(config, storage, Arc::new(TracingNotifier))?;

    let cleanup = spawn_unique_value_cleanup(
        state.storage.unique_values(),
        state.storage.leases(),
        state.config.instance_id.clone(),
        state.config.unique_value_cleanup_interval,
    );

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Keyward server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cleanup.abort();
    tracing::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
