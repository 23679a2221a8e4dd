//! Router configuration module
//!
//! Configures the operational routes and middleware layers.

use std::time::Duration;

use axum::{http::StatusCode, routing::get, Router};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, ready};
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let timeout = TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(state.config.timeout_secs),
    );

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
        .layer(timeout)
        .layer(TraceLayer::new_for_http())
}
