//! HTTP router configuration.

use std::time::Duration;

use axum::Router;
use axum::routing::{any, get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handler::{health_check, invoke_function, metrics};
use crate::state::AppState;

/// Build the application router.
///
/// Routes:
/// - `ANY /invoke/:function` - Invoke a guest export in a fresh sandbox
/// - `GET /health` - Health check
/// - `GET /metrics` - Node and loader diagnostics
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/invoke/:function", any(invoke_function))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
