//! HTTP surface: REST API under `/api` plus the `/ws` event channel

pub mod handlers;
pub mod responses;
pub mod routes;
pub mod websocket;

use crate::cache::RedisCache;
use crate::chain::ChainAdapter;
use crate::config::ServerConfig;
use crate::core::PulseResult;
use crate::hub::BroadcastHub;
use crate::pricing::PricingEngine;
use crate::risk::RiskScorer;
use crate::scheduler::Scheduler;
use crate::store::PostgresStore;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared API state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PostgresStore>,
    pub cache: Arc<RedisCache>,
    pub chain: Arc<ChainAdapter>,
    pub engine: Arc<PricingEngine>,
    pub scheduler: Arc<Scheduler>,
    pub hub: Arc<BroadcastHub>,
    pub risk: Arc<RiskScorer>,
}

/// Build the application router
pub fn create_app(state: AppState, enable_cors: bool) -> Router {
    let mut app = Router::new()
        .nest("/api", routes::create_api_routes())
        .merge(routes::create_ws_routes())
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    if enable_cors {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Start the API server
pub async fn start_server(state: AppState, config: &ServerConfig) -> PulseResult<JoinHandle<()>> {
    let app = create_app(state, config.enable_cors);
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::core::PulseError::Configuration(e.to_string()))?;
    info!("API server listening on {}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(handle)
}
