//! API route definitions

use super::{handlers, websocket, AppState};
use axum::routing::get;
use axum::Router;

/// Everything under the `/api` prefix
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/tokens", get(handlers::list_tokens))
        .route("/tokens/:mint/metrics", get(handlers::token_metrics))
        .route("/tokens/:mint/holders/top", get(handlers::top_holders))
        .route("/tokens/:mint/history", get(handlers::history))
        .route("/dashboard/info", get(handlers::dashboard_info))
}

/// The client-facing event channel
pub fn create_ws_routes() -> Router<AppState> {
    Router::new().route("/ws", get(websocket::websocket_handler))
}
