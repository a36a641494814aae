use super::handlers;
use super::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Assessment stream
        .route("/api/assess", post(handlers::assess))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        // Browser clients connect straight from the page
        .layer(CorsLayer::permissive())
        .with_state(state)
}
