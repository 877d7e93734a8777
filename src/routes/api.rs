use crate::handlers::{diagnostics, health_check, ready_check};
use crate::routes::auth_middleware::auth_middleware;
use crate::AppState;
use axum::{middleware, routing::get, Router};
use std::sync::Arc;

/// Create API routes
pub fn create_api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route_layer(middleware::from_fn(auth_middleware)) // Applies to all routes added above
        .route("/v1/health", get(health_check))
        .route("/v1/ready", get(ready_check))
        .with_state(state)
}
