//! API Router and Application State
//!
//! Central routing configuration and shared state.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::debounce::DebounceCoordinator;
use crate::webhooks;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Debounce coordinator
    pub coordinator: Arc<DebounceCoordinator>,
    /// Server configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(coordinator: DebounceCoordinator, config: Config) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            config: Arc::new(config),
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let max_body = state.config.max_callback_body_bytes;

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Trailing update callback (legacy path kept for already-queued callbacks)
        .route("/trailing-update", post(webhooks::handlers::trailing_update))
        .route("/qstash_debounced", post(webhooks::handlers::trailing_update))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(max_body))
        // State
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Trailing callback backend
    dispatcher: &'static str,
    /// Debounce record backend
    state_backend: &'static str,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        dispatcher: state.config.dispatch_backend.as_str(),
        state_backend: state.config.state_backend.as_str(),
    })
}
