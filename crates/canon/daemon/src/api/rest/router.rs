//! API Router configuration

use super::handlers;
use super::state::AppState;
use crate::config::ServerConfig;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let canon_routes = Router::new()
        // Decisions
        .route("/decide", post(handlers::decide))
        .route("/promote", post(handlers::promote))
        .route("/check-non-interference", post(handlers::check_non_interference))
        // Ledger
        .route("/ledger/recent", get(handlers::recent_ledger))
        .route("/ledger/verify/:pointer", get(handlers::verify_ledger))
        .route("/ledger/:pointer", get(handlers::get_ledger))
        // Denials
        .route("/why-not/:id", get(handlers::get_why_not))
        // Canon
        .route("/version", get(handlers::canon_version))
        .route("/store", get(handlers::canon_store));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/ready", get(handlers::readiness))
        .nest("/api/canon", canon_routes)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(server.max_body_size))
        .layer(TimeoutLayer::new(Duration::from_secs(server.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
