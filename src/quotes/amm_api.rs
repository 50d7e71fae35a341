//! Secondary quote source: the native AMM's public pool API
//!
//! A lighter fallback consulted only when the aggregator is unavailable or
//! returns nothing usable. Resolves a single pool for (mint, native), then
//! (mint, stable) on miss.

use super::{retry_after_header, Backoff, QuoteSource};
use crate::core::{PulseError, PulseResult, Quote, NATIVE_MINT, STABLE_MINT};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const SOURCE: &str = "amm";

#[derive(Debug, Deserialize)]
struct PoolsResponse {
    success: Option<bool>,
    data: Option<PoolsPage>,
}

#[derive(Debug, Deserialize)]
struct PoolsPage {
    data: Option<Vec<PoolInfo>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolInfo {
    id: String,
    /// Units of mint B per unit of mint A.
    price: f64,
    mint_a: PoolMint,
    mint_b: PoolMint,
    tvl: Option<f64>,
    day: Option<DayStats>,
}

#[derive(Debug, Clone, Deserialize)]
struct PoolMint {
    address: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DayStats {
    volume: Option<f64>,
}

pub struct AmmApiSource {
    http: reqwest::Client,
    base_url: String,
    backoff: Backoff,
}

impl AmmApiSource {
    pub fn new(base_url: String, request_timeout: Duration) -> PulseResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| PulseError::upstream(SOURCE, e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            backoff: Backoff::new(SOURCE),
        })
    }

    async fn fetch_pool(&self, mint: &str, quote: &str) -> PulseResult<Option<PoolInfo>> {
        self.backoff.check().await?;

        let url = format!(
            "{}/pools/info/mint?mint1={}&mint2={}&poolType=all&poolSortField=liquidity&sortType=desc&pageSize=1&page=1",
            self.base_url, mint, quote
        );
        crate::metrics::global()
            .upstream_requests
            .with_label_values(&[SOURCE])
            .inc();

        let response = self.http.get(&url).send().await.map_err(|e| {
            crate::metrics::global()
                .upstream_failures
                .with_label_values(&[SOURCE])
                .inc();
            PulseError::upstream(SOURCE, e.to_string())
        })?;

        if response.status().as_u16() == 429 {
            let retry_after = retry_after_header(&response);
            return Err(self.backoff.note(retry_after).await);
        }
        if !response.status().is_success() {
            crate::metrics::global()
                .upstream_failures
                .with_label_values(&[SOURCE])
                .inc();
            return Err(PulseError::upstream(
                SOURCE,
                format!("status {}", response.status()),
            ));
        }

        let body: PoolsResponse = response
            .json()
            .await
            .map_err(|e| PulseError::upstream(SOURCE, e.to_string()))?;

        if body.success == Some(false) {
            return Ok(None);
        }
        Ok(body.data.and_then(|page| {
            page.data
                .unwrap_or_default()
                .into_iter()
                .find(|pool| pool.price.is_finite() && pool.price > 0.0)
        }))
    }

    /// Price of `mint` in units of the pool's other side, regardless of
    /// which slot the mint landed in.
    fn price_of(pool: &PoolInfo, mint: &str) -> Option<f64> {
        if pool.mint_a.address == mint {
            Some(pool.price)
        } else if pool.mint_b.address == mint && pool.price > 0.0 {
            Some(1.0 / pool.price)
        } else {
            None
        }
    }
}

#[async_trait]
impl QuoteSource for AmmApiSource {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn single_quote(&self, mint: &str, native_usd: f64) -> PulseResult<Option<Quote>> {
        // Prefer a native-quoted pool, fall back to the stable pair.
        let (pool, quote_is_native) = match self.fetch_pool(mint, NATIVE_MINT).await? {
            Some(pool) => (Some(pool), true),
            None => (self.fetch_pool(mint, STABLE_MINT).await?, false),
        };
        let Some(pool) = pool else {
            debug!(mint, "no pool found on amm api");
            return Ok(None);
        };
        let Some(price_in_quote) = Self::price_of(&pool, mint) else {
            return Ok(None);
        };

        let (price_native, price_usd) = if quote_is_native {
            (price_in_quote, price_in_quote * native_usd)
        } else if native_usd > 0.0 {
            (price_in_quote / native_usd, price_in_quote)
        } else {
            (0.0, price_in_quote)
        };

        Ok(Some(Quote {
            mint: mint.to_string(),
            price_usd,
            price_native,
            market_cap: 0.0,
            liquidity_usd: pool.tvl.unwrap_or(0.0),
            volume_24h: pool.day.as_ref().and_then(|d| d.volume).unwrap_or(0.0),
            venue_id: SOURCE.to_string(),
            pair_id: pool.id,
            as_of: Utc::now(),
        }))
    }

    async fn native_usd_price(&self) -> PulseResult<Option<f64>> {
        let Some(pool) = self.fetch_pool(NATIVE_MINT, STABLE_MINT).await? else {
            return Ok(None);
        };
        Ok(Self::price_of(&pool, NATIVE_MINT).filter(|p| *p > 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(a: &str, b: &str, price: f64) -> PoolInfo {
        PoolInfo {
            id: "pool".to_string(),
            price,
            mint_a: PoolMint {
                address: a.to_string(),
            },
            mint_b: PoolMint {
                address: b.to_string(),
            },
            tvl: Some(10_000.0),
            day: None,
        }
    }

    #[test]
    fn price_respects_pool_orientation() {
        let forward = pool("mint1", NATIVE_MINT, 0.05);
        assert_eq!(AmmApiSource::price_of(&forward, "mint1"), Some(0.05));

        let reversed = pool(NATIVE_MINT, "mint1", 20.0);
        assert_eq!(AmmApiSource::price_of(&reversed, "mint1"), Some(0.05));

        assert_eq!(AmmApiSource::price_of(&forward, "unrelated"), None);
    }
}
