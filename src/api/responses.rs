//! API response types and error mapping

use crate::core::{HolderBalance, PriceSnapshot, PulseError};
use crate::risk::RiskReport;
use crate::store::HistoryEntry;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

/// Error shape every handler returns: `{"error": "<message>"}`
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<PulseError> for ApiError {
    fn from(err: PulseError) -> Self {
        match &err {
            PulseError::InvalidMint { .. } | PulseError::BadRequest(_) => {
                Self::bad_request(err.to_string())
            }
            PulseError::Throttled { .. }
            | PulseError::UpstreamUnavailable { .. }
            | PulseError::ChainUnavailable(_) => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: err.to_string(),
            },
            _ => Self::internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct TokensResponse {
    pub data: Vec<PriceSnapshot>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComprehensiveResponse {
    pub mint: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub total_supply: f64,
    pub price_usd: f64,
    pub price_native: f64,
    pub market_cap: f64,
    pub concentration_ratio: f64,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskReport>,
}

#[derive(Debug, Serialize)]
pub struct HoldersResponse {
    pub data: Vec<HolderBalance>,
    pub total: usize,
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub data: Vec<HistoryEntry>,
    pub window: String,
    pub total: usize,
}

/// Top-10 holder share sum, clamped to 100
pub fn concentration_ratio(holders: &[HolderBalance]) -> f64 {
    holders
        .iter()
        .take(10)
        .map(|h| h.share_pct)
        .sum::<f64>()
        .min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder(share_pct: f64) -> HolderBalance {
        HolderBalance {
            owner: "o".to_string(),
            balance: 0.0,
            share_pct,
        }
    }

    #[test]
    fn concentration_sums_top_ten_only() {
        let holders: Vec<HolderBalance> = (0..15).map(|_| holder(2.0)).collect();
        assert!((concentration_ratio(&holders) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn concentration_clamps_to_hundred() {
        let holders: Vec<HolderBalance> = (0..10).map(|_| holder(15.0)).collect();
        assert_eq!(concentration_ratio(&holders), 100.0);
    }

    #[test]
    fn concentration_monotone_under_decreasing_shares() {
        let holders: Vec<HolderBalance> =
            (0..10).map(|i| holder(10.0 - i as f64)).collect();
        let full = concentration_ratio(&holders);
        let fewer = concentration_ratio(&holders[..5]);
        assert!(fewer <= full);
    }
}
