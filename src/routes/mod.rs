//! Router assembly: HTTP endpoints, WebSocket upgrade, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws` (push side of the sync channel)
/// - REST-ish API under `/api/v1/...` (actions + the authoritative poll path)
/// - CORS (allow any origin/method/headers) – adjust for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/match", post(http::http_create_match))
        .route("/api/v1/match/:code", get(http::http_get_match))
        .route("/api/v1/match/:code/accept", post(http::http_accept))
        .route("/api/v1/match/:code/decline", post(http::http_decline))
        .route("/api/v1/match/:code/start", post(http::http_start))
        .route("/api/v1/match/:code/selection", post(http::http_selection))
        .route("/api/v1/match/:code/submit", post(http::http_submit))
        .route("/api/v1/match/:code/rematch", post(http::http_rematch))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
