//! Pricing engine: multi-source composition, persistence, publication

use crate::cache::{keys, RedisCache};
use crate::chain::ChainAdapter;
use crate::config::PricingConfig;
use crate::core::{
    PriceSnapshot, PulseError, PulseResult, NATIVE_MINT, PRICE_UPDATE_CHANNEL, STABLE_MINT,
};
use crate::quotes::QuoteSource;
use crate::store::PostgresStore;
use crate::validation::{TokenValidator, Verdict};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PricingEngine {
    store: Arc<PostgresStore>,
    cache: Arc<RedisCache>,
    chain: Arc<ChainAdapter>,
    validator: Arc<TokenValidator>,
    /// Quote sources in preference order; later sources are consulted only
    /// when earlier ones fail or return nothing usable.
    sources: Vec<Arc<dyn QuoteSource>>,
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(
        store: Arc<PostgresStore>,
        cache: Arc<RedisCache>,
        chain: Arc<ChainAdapter>,
        validator: Arc<TokenValidator>,
        sources: Vec<Arc<dyn QuoteSource>>,
        config: PricingConfig,
    ) -> Self {
        Self {
            store,
            cache,
            chain,
            validator,
            sources,
            config,
        }
    }

    /// Current USD price of the native coin, cached up to 30 s.
    ///
    /// Sources in order, then a native/stable pool on chain, then the
    /// configured constant as documented last resort.
    pub async fn native_usd_price(&self) -> PulseResult<f64> {
        if let Ok(Some(cached)) = self.cache.get(keys::NATIVE_USD_PRICE).await {
            if let Ok(price) = cached.parse::<f64>() {
                return Ok(price);
            }
        }

        for source in &self.sources {
            match source.native_usd_price().await {
                Ok(Some(price)) if price > 0.0 => {
                    self.cache_native_usd(price).await;
                    return Ok(price);
                }
                Ok(_) => {}
                Err(e) => debug!(source = source.name(), error = %e, "native usd lookup failed"),
            }
        }

        match self.native_usd_from_pool().await {
            Ok(Some(price)) => {
                self.cache_native_usd(price).await;
                return Ok(price);
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "native usd pool derivation failed"),
        }

        warn!(
            fallback = self.config.native_usd_fallback,
            "serving native usd fallback constant"
        );
        Ok(self.config.native_usd_fallback)
    }

    async fn cache_native_usd(&self, price: f64) {
        if let Err(e) = self
            .cache
            .set_with_ttl(
                keys::NATIVE_USD_PRICE,
                &price.to_string(),
                self.config.native_usd_cache_ttl_secs,
            )
            .await
        {
            warn!(error = %e, "failed to cache native usd price");
        }
    }

    async fn native_usd_from_pool(&self) -> PulseResult<Option<f64>> {
        let pools = self
            .chain
            .find_pools_for_pair(NATIVE_MINT, STABLE_MINT)
            .await?;
        let Some(best) = self.deepest_pool(&pools, NATIVE_MINT).await? else {
            return Ok(None);
        };
        // The quote side is the stable coin, so its reserve already is USD.
        if best.quote_reserve_ui() < self.config.min_pool_reserve_usd {
            return Ok(None);
        }
        let price = best.price_of_token();
        Ok((price > 0.0).then_some(price))
    }

    /// Reserve-richest pool for a mint among candidates
    async fn deepest_pool(
        &self,
        pools: &[crate::chain::PoolCandidate],
        token_mint: &str,
    ) -> PulseResult<Option<crate::chain::PoolReserves>> {
        let mut best: Option<crate::chain::PoolReserves> = None;
        for pool in pools {
            match self.chain.read_pool_reserves(&pool.pool_addr, token_mint).await {
                Ok(reserves) => {
                    let deeper = best
                        .map(|b| reserves.quote_reserve_ui() > b.quote_reserve_ui())
                        .unwrap_or(true);
                    if deeper {
                        best = Some(reserves);
                    }
                }
                Err(e) => debug!(pool = %pool.pool_addr, error = %e, "reserve read failed"),
            }
        }
        Ok(best)
    }

    /// Price of a mint in native units, with a short positive cache.
    ///
    /// Dispatch: the native mint is 1 by definition; then quote sources in
    /// order; then the deepest on-chain pool against the native mint.
    pub async fn native_price_for_mint(&self, mint: &str, native_usd: f64) -> PulseResult<f64> {
        if mint == NATIVE_MINT {
            return Ok(1.0);
        }

        let cache_key = keys::token_price_native(mint);
        if let Ok(Some(cached)) = self.cache.get(&cache_key).await {
            if let Ok(price) = cached.parse::<f64>() {
                return Ok(price);
            }
        }

        let mut price = None;
        for source in &self.sources {
            match source.single_quote(mint, native_usd).await {
                Ok(Some(quote)) if quote.price_native > 0.0 => {
                    price = Some(quote.price_native);
                    break;
                }
                Ok(_) => debug!(mint, source = source.name(), "no usable quote"),
                Err(e) if e.is_transient() => {
                    debug!(mint, source = source.name(), error = %e, "source unavailable")
                }
                Err(e) => return Err(e),
            }
        }

        let price = match price {
            Some(price) => price,
            None => self.native_price_from_chain(mint, native_usd).await?,
        };

        if let Err(e) = self
            .cache
            .set_with_ttl(
                &cache_key,
                &price.to_string(),
                self.config.native_price_cache_ttl_secs,
            )
            .await
        {
            warn!(mint, error = %e, "failed to cache native price");
        }

        Ok(price)
    }

    async fn native_price_from_chain(&self, mint: &str, native_usd: f64) -> PulseResult<f64> {
        let pools = self.chain.find_pools_for_pair(mint, NATIVE_MINT).await?;
        if pools.is_empty() {
            return Err(PulseError::upstream("chain-pools", "no pool for pair"));
        }

        let Some(best) = self.deepest_pool(&pools, mint).await? else {
            return Err(PulseError::upstream("chain-pools", "no readable pool"));
        };

        // Reserve depth measured in USD through the native leg.
        let reserve_usd = best.quote_reserve_ui() * native_usd;
        if reserve_usd < self.config.min_pool_reserve_usd {
            return Err(PulseError::upstream(
                "chain-pools",
                format!("deepest pool only holds ${:.0}", reserve_usd),
            ));
        }

        let price = best.price_of_token();
        if price <= 0.0 {
            return Err(PulseError::upstream("chain-pools", "empty pool"));
        }
        Ok(price)
    }

    /// Compose a snapshot from supply, the mint's native price, and the
    /// native coin's USD price.
    pub async fn price_of(&self, mint: &str) -> PulseResult<PriceSnapshot> {
        let (supply, legs) = tokio::join!(self.chain.read_supply(mint), async {
            let native_usd = self.native_usd_price().await?;
            let price_native = self.native_price_for_mint(mint, native_usd).await?;
            Ok::<(f64, f64), PulseError>((native_usd, price_native))
        });
        let supply = supply?;
        let (native_usd, price_native) = legs?;

        let total_supply = supply.ui_amount();
        let price_usd = price_native * native_usd;

        Ok(PriceSnapshot {
            mint: mint.to_string(),
            price_usd,
            price_native,
            market_cap: price_usd * total_supply,
            total_supply,
            as_of: Utc::now(),
        })
    }

    /// One full tick for a mint: validate, compute, persist atomically,
    /// publish. Invalid mints are purged here and surfaced so the scheduler
    /// can ban and cancel.
    pub async fn update_mint(&self, mint: &str) -> PulseResult<PriceSnapshot> {
        match self.validator.check(mint).await? {
            Verdict::Valid => {}
            Verdict::Invalid { reason, fresh } => {
                if fresh {
                    if let Err(e) = self.validator.purge_invalid(mint).await {
                        warn!(mint, error = %e, "purge after invalid verdict failed");
                    }
                }
                return Err(PulseError::InvalidMint { reason });
            }
        }

        let snapshot = self.price_of(mint).await?;
        self.commit(&snapshot).await?;
        Ok(snapshot)
    }

    /// Persist-then-publish; a snapshot is only announced after both rows
    /// committed.
    async fn commit(&self, snapshot: &PriceSnapshot) -> PulseResult<()> {
        self.store.save_snapshot(snapshot).await?;

        let payload = serde_json::to_string(snapshot)?;
        // Fan-out is fire-and-forget: a pub/sub hiccup must not fail a tick
        // whose rows are already durable.
        if let Err(e) = self.cache.publish(PRICE_UPDATE_CHANNEL, &payload).await {
            warn!(mint = %snapshot.mint, error = %e, "price_update publish failed");
        }
        crate::metrics::global().snapshots_published.inc();
        Ok(())
    }

    /// Refresh many mints at once, amortising upstream calls through the
    /// batch-capable source and falling back per mint.
    pub async fn batch_update(&self, mints: &[String]) -> Vec<(String, PulseResult<PriceSnapshot>)> {
        let batch = self.validator.validate_batch(mints).await;
        if batch.valid.is_empty() {
            return Vec::new();
        }

        let native_usd = match self.native_usd_price().await {
            Ok(price) => price,
            Err(e) => {
                warn!(error = %e, "batch update aborted: no native usd price");
                return batch
                    .valid
                    .into_iter()
                    .map(|mint| {
                        (
                            mint,
                            Err(PulseError::upstream("aggregator", "no native usd price")),
                        )
                    })
                    .collect();
            }
        };

        let quotes = match self.sources.first() {
            Some(source) => source
                .batch_quotes(&batch.valid, native_usd)
                .await
                .unwrap_or_else(|e| {
                    debug!(error = %e, "batch quote failed, falling back per mint");
                    Default::default()
                }),
            None => Default::default(),
        };

        let mut outcomes = Vec::with_capacity(batch.valid.len());
        for mint in batch.valid {
            let result = match quotes.get(&mint) {
                Some(quote) if quote.price_native > 0.0 => {
                    self.snapshot_from_quote(&mint, quote.price_native, native_usd)
                        .await
                }
                _ => self.update_mint(&mint).await,
            };
            outcomes.push((mint, result));
        }
        outcomes
    }

    async fn snapshot_from_quote(
        &self,
        mint: &str,
        price_native: f64,
        native_usd: f64,
    ) -> PulseResult<PriceSnapshot> {
        let supply = self.chain.read_supply(mint).await?;
        let total_supply = supply.ui_amount();
        let price_usd = price_native * native_usd;

        let snapshot = PriceSnapshot {
            mint: mint.to_string(),
            price_usd,
            price_native,
            market_cap: price_usd * total_supply,
            total_supply,
            as_of: Utc::now(),
        };
        self.commit(&snapshot).await?;
        Ok(snapshot)
    }

    /// Latest committed snapshot, if any
    pub async fn current_of(&self, mint: &str) -> PulseResult<Option<PriceSnapshot>> {
        self.store.get_latest(mint).await
    }

    pub fn validator(&self) -> &Arc<TokenValidator> {
        &self.validator
    }

    pub fn store(&self) -> &Arc<PostgresStore> {
        &self.store
    }

    pub fn log_sources(&self) {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
        info!(sources = ?names, "pricing engine sources configured");
    }
}
