//! Aggregator quote source: batched multi-venue market data
//!
//! Queries a DexScreener-shaped API for all pairs of up to 30 mints per
//! request and reduces each mint's pair list to the single best-priced pair.

use super::{retry_after_header, Backoff, QuoteSource, RequestGate};
use crate::cache::{keys, RedisCache};
use crate::core::{PulseError, PulseResult, Quote, TokenInfo, NATIVE_MINT, STABLE_MINT};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SOURCE: &str = "aggregator";
const MAX_BATCH: usize = 30;
const TOKEN_INFO_TTL_SECS: u64 = 3600;

/// Venues trusted enough to waive the volume requirement
const ESTABLISHED_VENUES: [&str; 4] = ["raydium", "orca", "jupiter", "meteora"];

/// Venue substrings that mark bonding-curve launch platforms
const LAUNCH_MARKERS: [&str; 4] = ["pump", "moonshot", "launchlab", "boop"];

// Wire types for the aggregator response.

#[derive(Debug, Deserialize)]
struct TokensResponse {
    pairs: Option<Vec<PairData>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairData {
    dex_id: Option<String>,
    pair_address: Option<String>,
    base_token: TokenSide,
    quote_token: TokenSide,
    price_native: Option<String>,
    price_usd: Option<String>,
    txns: Option<Txns>,
    volume: Option<PeriodStats>,
    liquidity: Option<LiquidityStats>,
    market_cap: Option<f64>,
    fdv: Option<f64>,
    labels: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenSide {
    address: String,
    name: Option<String>,
    symbol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Txns {
    h24: Option<TxnCounts>,
}

#[derive(Debug, Clone, Deserialize)]
struct TxnCounts {
    buys: Option<u64>,
    sells: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct PeriodStats {
    h24: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct LiquidityStats {
    usd: Option<f64>,
}

/// Normalised view of one pair, the unit of selection
#[derive(Debug, Clone)]
pub struct PairInfo {
    pub pair_id: String,
    pub venue: String,
    pub quote_mint: String,
    pub price_usd: f64,
    pub price_native: Option<f64>,
    pub liquidity_usd: f64,
    pub volume_24h: f64,
    pub txn_count_24h: u64,
    pub market_cap: f64,
    pub launch_label: bool,
}

impl PairInfo {
    fn is_launch(&self) -> bool {
        self.launch_label || LAUNCH_MARKERS.iter().any(|m| self.venue.contains(m))
    }

    fn is_established(&self) -> bool {
        ESTABLISHED_VENUES.iter().any(|v| self.venue == *v)
    }
}

/// Filter gate applied before scoring
pub fn passes_filters(pair: &PairInfo) -> bool {
    if pair.price_usd <= 0.0 {
        return false;
    }
    if pair.is_launch() {
        return pair.volume_24h > 1000.0 && pair.liquidity_usd > 5000.0;
    }
    if pair.is_established() {
        return pair.liquidity_usd >= 500.0;
    }
    pair.liquidity_usd >= 500.0 && pair.volume_24h >= 100.0
}

/// Tie-break score; higher is better
pub fn score_pair(pair: &PairInfo) -> f64 {
    let penalty = if pair.is_launch() {
        if pair.volume_24h > 100_000.0 {
            -10_000.0
        } else {
            -100_000.0
        }
    } else {
        0.0
    };

    let turnover_bonus = if pair.liquidity_usd > 0.0 && pair.volume_24h / pair.liquidity_usd > 0.1
    {
        15_000.0
    } else {
        0.0
    };
    let activity_bonus = if pair.txn_count_24h > 50 { 5_000.0 } else { 0.0 };
    let established_bonus = if pair.is_established() { 50_000.0 } else { 0.0 };

    0.3 * pair.liquidity_usd
        + 0.4 * pair.volume_24h
        + 0.3 * (200.0 * pair.txn_count_24h as f64)
        + established_bonus
        + penalty
        + turnover_bonus
        + activity_bonus
}

fn best_of<'a, I>(pairs: I) -> Option<&'a PairInfo>
where
    I: IntoIterator<Item = &'a PairInfo>,
{
    pairs
        .into_iter()
        .max_by(|a, b| score_pair(a).total_cmp(&score_pair(b)))
}

/// Pick one pair for a mint: filter, then prefer native-quoted pairs, then
/// stable-quoted, then the best score overall.
pub fn select_best_pair(pairs: &[PairInfo]) -> Option<&PairInfo> {
    let usable: Vec<&PairInfo> = pairs.iter().filter(|p| passes_filters(p)).collect();
    if usable.is_empty() {
        return None;
    }

    let native: Vec<&PairInfo> = usable
        .iter()
        .copied()
        .filter(|p| p.quote_mint == NATIVE_MINT)
        .collect();
    if !native.is_empty() {
        return best_of(native.into_iter());
    }

    let stable: Vec<&PairInfo> = usable
        .iter()
        .copied()
        .filter(|p| p.quote_mint == STABLE_MINT)
        .collect();
    if !stable.is_empty() {
        return best_of(stable.into_iter());
    }

    best_of(usable.into_iter())
}

pub struct AggregatorSource {
    http: reqwest::Client,
    base_url: String,
    cache: Arc<RedisCache>,
    cache_ttl_secs: u64,
    gate: RequestGate,
    backoff: Backoff,
}

impl AggregatorSource {
    pub fn new(
        base_url: String,
        cache: Arc<RedisCache>,
        cache_ttl_secs: u64,
        min_request_interval: Duration,
        request_timeout: Duration,
    ) -> PulseResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| PulseError::upstream(SOURCE, e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            cache,
            // The positive cache must never exceed a minute.
            cache_ttl_secs: cache_ttl_secs.clamp(5, 60),
            gate: RequestGate::new(min_request_interval),
            backoff: Backoff::new(SOURCE),
        })
    }

    async fn fetch_pairs(&self, mints: &[String]) -> PulseResult<Vec<PairData>> {
        self.backoff.check().await?;
        self.gate.wait().await;

        let url = format!("{}/{}", self.base_url, mints.join(","));
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

        let body: TokensResponse = response
            .json()
            .await
            .map_err(|e| PulseError::upstream(SOURCE, e.to_string()))?;
        Ok(body.pairs.unwrap_or_default())
    }

    fn normalise(pair: &PairData) -> Option<(String, PairInfo)> {
        let price_usd = pair.price_usd.as_deref()?.parse::<f64>().ok()?;
        let venue = pair.dex_id.clone().unwrap_or_default().to_lowercase();
        let launch_label = pair
            .labels
            .as_ref()
            .map(|labels| {
                labels
                    .iter()
                    .any(|l| LAUNCH_MARKERS.iter().any(|m| l.to_lowercase().contains(m)))
            })
            .unwrap_or(false);
        let txns = pair
            .txns
            .as_ref()
            .and_then(|t| t.h24.as_ref())
            .map(|c| c.buys.unwrap_or(0) + c.sells.unwrap_or(0))
            .unwrap_or(0);

        let info = PairInfo {
            pair_id: pair.pair_address.clone().unwrap_or_default(),
            venue,
            quote_mint: pair.quote_token.address.clone(),
            price_usd,
            price_native: pair
                .price_native
                .as_deref()
                .and_then(|p| p.parse::<f64>().ok())
                .filter(|p| p.is_finite() && *p > 0.0),
            liquidity_usd: pair.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0),
            volume_24h: pair.volume.as_ref().and_then(|v| v.h24).unwrap_or(0.0),
            txn_count_24h: txns,
            market_cap: pair.market_cap.or(pair.fdv).unwrap_or(0.0),
            launch_label,
        };
        Some((pair.base_token.address.clone(), info))
    }

    fn quote_from(mint: &str, pair: &PairInfo, native_usd: f64) -> Quote {
        // The native leg may be absent on stable-quoted pairs.
        let price_native = pair.price_native.unwrap_or_else(|| {
            if native_usd > 0.0 {
                pair.price_usd / native_usd
            } else {
                0.0
            }
        });
        Quote {
            mint: mint.to_string(),
            price_usd: pair.price_usd,
            price_native,
            market_cap: pair.market_cap.max(0.0),
            liquidity_usd: pair.liquidity_usd,
            volume_24h: pair.volume_24h,
            venue_id: pair.venue.clone(),
            pair_id: pair.pair_id.clone(),
            as_of: Utc::now(),
        }
    }

    /// Capture name/symbol metadata from the pair payload while we have it
    async fn cache_token_info(&self, mint: &str, pair: &PairData, total_supply: f64) {
        let info = TokenInfo {
            mint: mint.to_string(),
            name: pair.base_token.name.clone(),
            symbol: pair.base_token.symbol.clone(),
            decimals: 0,
            total_supply,
        };
        if let Err(e) = self
            .cache
            .set_json(&keys::token_info(mint), &info, TOKEN_INFO_TTL_SECS)
            .await
        {
            warn!(mint, error = %e, "failed to cache token info");
        }
    }
}

#[async_trait]
impl QuoteSource for AggregatorSource {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn single_quote(&self, mint: &str, native_usd: f64) -> PulseResult<Option<Quote>> {
        let cache_key = keys::quote(SOURCE, mint);
        if let Ok(Some(quote)) = self.cache.get_json::<Quote>(&cache_key).await {
            crate::metrics::global()
                .cache_hits
                .with_label_values(&["quote"])
                .inc();
            return Ok(Some(quote));
        }
        crate::metrics::global()
            .cache_misses
            .with_label_values(&["quote"])
            .inc();

        let mut quotes = self
            .batch_quotes(std::slice::from_ref(&mint.to_string()), native_usd)
            .await?;
        Ok(quotes.remove(mint))
    }

    async fn batch_quotes(
        &self,
        mints: &[String],
        native_usd: f64,
    ) -> PulseResult<HashMap<String, Quote>> {
        let mut quotes = HashMap::new();

        for chunk in mints.chunks(MAX_BATCH) {
            let pairs = self.fetch_pairs(chunk).await?;

            // Group every returned pair under its base mint.
            let mut grouped: HashMap<String, Vec<PairInfo>> = HashMap::new();
            let mut raw_by_pair: HashMap<String, PairData> = HashMap::new();
            for pair in &pairs {
                if let Some((mint, info)) = Self::normalise(pair) {
                    raw_by_pair.insert(info.pair_id.clone(), pair.clone());
                    grouped.entry(mint).or_default().push(info);
                }
            }

            for mint in chunk {
                let Some(candidates) = grouped.get(mint.as_str()) else {
                    continue;
                };
                let Some(best) = select_best_pair(candidates) else {
                    debug!(mint = %mint, pairs = candidates.len(), "no pair passed selection");
                    continue;
                };

                let quote = Self::quote_from(mint, best, native_usd);
                if let Some(raw) = raw_by_pair.get(&best.pair_id) {
                    self.cache_token_info(mint, raw, quote.market_cap).await;
                }
                if let Err(e) = self
                    .cache
                    .set_json(&keys::quote(SOURCE, mint), &quote, self.cache_ttl_secs)
                    .await
                {
                    warn!(mint = %mint, error = %e, "failed to cache quote");
                }
                quotes.insert(mint.clone(), quote);
            }
        }

        Ok(quotes)
    }

    async fn native_usd_price(&self) -> PulseResult<Option<f64>> {
        let pairs = self.fetch_pairs(&[NATIVE_MINT.to_string()]).await?;
        let best = pairs
            .iter()
            .filter_map(Self::normalise)
            .filter(|(mint, info)| mint == NATIVE_MINT && info.quote_mint == STABLE_MINT)
            .map(|(_, info)| info)
            .max_by(|a, b| a.liquidity_usd.total_cmp(&b.liquidity_usd));
        Ok(best.map(|p| p.price_usd).filter(|p| *p > 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(venue: &str, quote: &str, liquidity: f64, volume: f64) -> PairInfo {
        PairInfo {
            pair_id: format!("{}-{}", venue, quote),
            venue: venue.to_string(),
            quote_mint: quote.to_string(),
            price_usd: 1.0,
            price_native: Some(0.01),
            liquidity_usd: liquidity,
            volume_24h: volume,
            txn_count_24h: 0,
            market_cap: 0.0,
            launch_label: false,
        }
    }

    #[test]
    fn launch_pairs_need_volume_and_liquidity() {
        let mut p = pair("pumpswap", NATIVE_MINT, 4000.0, 5000.0);
        assert!(!passes_filters(&p)); // liquidity below the launch bar

        p.liquidity_usd = 6000.0;
        p.volume_24h = 500.0;
        assert!(!passes_filters(&p)); // volume below the launch bar

        p.volume_24h = 2000.0;
        assert!(passes_filters(&p));
    }

    #[test]
    fn established_venues_waive_volume() {
        let p = pair("raydium", NATIVE_MINT, 600.0, 0.0);
        assert!(passes_filters(&p));

        let thin = pair("raydium", NATIVE_MINT, 100.0, 1_000_000.0);
        assert!(!passes_filters(&thin));
    }

    #[test]
    fn unknown_venues_need_both_floors() {
        assert!(passes_filters(&pair("somedex", NATIVE_MINT, 600.0, 150.0)));
        assert!(!passes_filters(&pair("somedex", NATIVE_MINT, 600.0, 50.0)));
        assert!(!passes_filters(&pair("somedex", NATIVE_MINT, 400.0, 150.0)));
    }

    #[test]
    fn native_quote_preferred_over_higher_scoring_stable() {
        let native = pair("raydium", NATIVE_MINT, 1_000.0, 1_000.0);
        let stable = pair("raydium", STABLE_MINT, 900_000.0, 900_000.0);
        let pairs = vec![stable, native];

        let best = select_best_pair(&pairs).unwrap();
        assert_eq!(best.quote_mint, NATIVE_MINT);
    }

    #[test]
    fn stable_quote_preferred_when_no_native_pair() {
        let other = pair("raydium", "SomeOtherQuoteMint1111111111111111111111111", 900_000.0, 900_000.0);
        let stable = pair("orca", STABLE_MINT, 1_000.0, 1_000.0);
        let pairs = vec![other, stable];

        let best = select_best_pair(&pairs).unwrap();
        assert_eq!(best.quote_mint, STABLE_MINT);
    }

    #[test]
    fn score_prefers_established_venue_on_equal_books() {
        let established = pair("orca", NATIVE_MINT, 10_000.0, 5_000.0);
        let unknown = pair("somedex", NATIVE_MINT, 10_000.0, 5_000.0);
        assert!(score_pair(&established) > score_pair(&unknown));
    }

    #[test]
    fn launch_penalty_softens_with_heavy_volume() {
        let quiet = PairInfo {
            volume_24h: 50_000.0,
            ..pair("pumpswap", NATIVE_MINT, 50_000.0, 50_000.0)
        };
        let busy = PairInfo {
            volume_24h: 200_000.0,
            ..quiet.clone()
        };
        // Beyond the volume bar the launch penalty shrinks by 90k.
        assert!(score_pair(&busy) - score_pair(&quiet) > 90_000.0);
    }

    #[test]
    fn turnover_and_activity_bonuses_apply() {
        let mut p = pair("somedex", NATIVE_MINT, 10_000.0, 500.0);
        let base = score_pair(&p);

        p.volume_24h = 2_000.0; // turnover ratio now above 0.1
        p.txn_count_24h = 60;
        let boosted = score_pair(&p);
        assert!(boosted > base + 15_000.0);
    }

    #[test]
    fn nothing_selected_when_all_filtered() {
        let pairs = vec![pair("somedex", NATIVE_MINT, 10.0, 1.0)];
        assert!(select_best_pair(&pairs).is_none());
        assert!(select_best_pair(&[]).is_none());
    }

    #[test]
    fn label_marks_launch_even_on_neutral_venue() {
        let mut p = pair("somedex", NATIVE_MINT, 600.0, 150.0);
        p.launch_label = true;
        // Now held to the launch bar instead of the generic one.
        assert!(!passes_filters(&p));
    }
}
