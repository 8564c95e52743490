//! Quant Server - HTTP front end for the quant-core analytics.
//!
//! Serves quotes and history from a pluggable market data provider behind
//! TTL caches, and runs portfolio optimization, VaR, stress tests, signals and
//! backtests on request.

pub mod auth;
pub mod config;
pub mod error;
pub mod market;
pub mod routes;
pub mod state;
pub mod store;

use axum::routing::get;
use axum::{middleware, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::ServerConfig;
pub use error::ApiError;
pub use state::AppState;

/// Full application router. `/health` stays open; `/api/v1` routes go through
/// bearer-token auth.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = routes::api_router().route_layer(middleware::from_fn_with_state(
        Arc::clone(&state),
        auth::require_auth,
    ));

    Router::new()
        .route("/health", get(routes::health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
