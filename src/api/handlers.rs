//! API request handlers

use super::responses::*;
use super::AppState;
use crate::cache::keys;
use crate::core::{HolderBalance, PulseError, TokenInfo, Window};
use axum::extract::{Path, Query, State};
use axum::response::Json;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

const HOLDERS_CACHE_TTL_SECS: u64 = 300;
const HISTORY_CAP: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub window: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

fn parse_window(raw: &Option<String>) -> Result<Window, ApiError> {
    match raw {
        Some(raw) => raw.parse().map_err(ApiError::bad_request),
        None => Ok(Window::default()),
    }
}

/// Dependency health; 503 with an unhealthy body when anything is down
pub async fn health(
    State(state): State<AppState>,
) -> Result<Json<Value>, (axum::http::StatusCode, Json<Value>)> {
    let (database, redis) = tokio::join!(state.store.health_check(), state.cache.health_check());

    match (&database, &redis) {
        (Ok(()), Ok(())) => Ok(Json(json!({
            "status": "healthy",
            "timestamp": Utc::now().timestamp(),
            "database": "connected",
            "redis": "connected",
        }))),
        _ => {
            let detail = database
                .err()
                .or(redis.err())
                .map(|e| e.to_string())
                .unwrap_or_default();
            Err((
                axum::http::StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "error": detail })),
            ))
        }
    }
}

/// Prometheus text exposition
pub async fn metrics() -> String {
    crate::metrics::global().encode()
}

/// Paged latest snapshots, newest first
pub async fn list_tokens(
    State(state): State<AppState>,
    Query(params): Query<PageQuery>,
) -> Result<Json<TokensResponse>, ApiError> {
    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(20);
    if page < 1 {
        return Err(ApiError::bad_request("page must be >= 1"));
    }
    if !(1..=100).contains(&limit) {
        return Err(ApiError::bad_request("limit must be within 1..=100"));
    }

    let (data, total) = state.store.list_latest((page - 1) * limit, limit).await?;
    Ok(Json(TokensResponse {
        data,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
        },
    }))
}

/// Cache-through top-holder read shared by two endpoints
async fn top_holders_cached(
    state: &AppState,
    mint: &str,
    limit: usize,
) -> Result<Vec<HolderBalance>, PulseError> {
    let cache_key = keys::top_holders(mint, limit);
    if let Ok(Some(cached)) = state.cache.get_json::<Vec<HolderBalance>>(&cache_key).await {
        crate::metrics::global()
            .cache_hits
            .with_label_values(&["holders"])
            .inc();
        return Ok(cached);
    }
    crate::metrics::global()
        .cache_misses
        .with_label_values(&["holders"])
        .inc();

    let holders = state.chain.read_top_holders(mint, limit).await?;
    if let Err(e) = state
        .cache
        .set_json(&cache_key, &holders, HOLDERS_CACHE_TTL_SECS)
        .await
    {
        warn!(mint, error = %e, "failed to cache holders");
    }
    Ok(holders)
}

/// Comprehensive per-token analytics: metadata, latest price, concentration
/// and risk, gathered in parallel
pub async fn token_metrics(
    State(state): State<AppState>,
    Path(mint): Path<String>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<ComprehensiveResponse>, ApiError> {
    parse_window(&params.window)?;
    state.engine.validator().validate(&mint).await?;

    let token_info_key = keys::token_info(&mint);
    let (info, latest, holders, risk) = tokio::join!(
        state.cache.get_json::<TokenInfo>(&token_info_key),
        state.engine.current_of(&mint),
        top_holders_cached(&state, &mint, 10),
        state.risk.report(&mint),
    );

    let latest = latest?;
    if latest.is_none() {
        // First sighting of this mint: pull it into the polling set.
        if let Err(e) = state.scheduler.enrol(&mint).await {
            debug!(mint, error = %e, "auto-enrol failed");
        }
    }

    let holders = holders.unwrap_or_else(|e| {
        debug!(mint, error = %e, "holders unavailable");
        Vec::new()
    });
    let risk = risk.unwrap_or_else(|e| {
        debug!(mint, error = %e, "risk report unavailable");
        None
    });
    let info = info.unwrap_or(None);

    let (price_usd, price_native, market_cap, total_supply, last_updated) = match &latest {
        Some(snapshot) => (
            snapshot.price_usd,
            snapshot.price_native,
            snapshot.market_cap,
            snapshot.total_supply,
            Some(snapshot.as_of),
        ),
        None => (0.0, 0.0, 0.0, 0.0, None),
    };

    Ok(Json(ComprehensiveResponse {
        mint: mint.clone(),
        name: info.as_ref().and_then(|i| i.name.clone()),
        symbol: info.as_ref().and_then(|i| i.symbol.clone()),
        total_supply,
        price_usd,
        price_native,
        market_cap,
        concentration_ratio: concentration_ratio(&holders),
        last_updated,
        risk,
    }))
}

/// Top holders with share percentages
pub async fn top_holders(
    State(state): State<AppState>,
    Path(mint): Path<String>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<HoldersResponse>, ApiError> {
    let limit = params.limit.unwrap_or(10);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::bad_request("limit must be within 1..=100"));
    }
    state.engine.validator().validate(&mint).await?;

    let holders = top_holders_cached(&state, &mint, limit).await?;
    Ok(Json(HoldersResponse {
        total: holders.len(),
        limit,
        data: holders,
    }))
}

/// History entries inside the window, ascending by time
pub async fn history(
    State(state): State<AppState>,
    Path(mint): Path<String>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let window = parse_window(&params.window)?;
    state.engine.validator().validate(&mint).await?;

    let to = Utc::now();
    let from = to - ChronoDuration::seconds(window.as_secs());
    let data = state
        .store
        .history_in_range(&mint, from, to, HISTORY_CAP)
        .await?;

    Ok(Json(HistoryResponse {
        total: data.len(),
        window: window.to_string(),
        data,
    }))
}

/// Static manifest for the bundled dashboard
pub async fn dashboard_info() -> Json<Value> {
    Json(json!({
        "name": "mintpulse",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Real-time price and risk analytics for SPL tokens",
        "endpoints": {
            "tokens": "/api/tokens",
            "metrics": "/api/tokens/:mint/metrics",
            "holders": "/api/tokens/:mint/holders/top",
            "history": "/api/tokens/:mint/history",
            "health": "/api/health",
        },
        "websocket": {
            "namespace": "/ws",
            "subscribe": "<mint>,subscribe",
            "unsubscribe": "<mint>,unsubscribe",
        },
    }))
}
