//! mintpulse service entry point
//!
//! Wires the cache, store, chain adapter, quote sources, pricing engine,
//! scheduler and broadcast hub together, then serves the HTTP/WS surface.

use anyhow::Result;
use clap::Parser;
use mintpulse::api::{self, AppState};
use mintpulse::cache::RedisCache;
use mintpulse::chain::ChainAdapter;
use mintpulse::config::ServiceConfig;
use mintpulse::hub::BroadcastHub;
use mintpulse::pricing::PricingEngine;
use mintpulse::quotes::{AggregatorSource, AmmApiSource, QuoteSource};
use mintpulse::risk::RiskScorer;
use mintpulse::scheduler::{JobQueue, Scheduler};
use mintpulse::store::PostgresStore;
use mintpulse::validation::TokenValidator;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "mintpulse")]
#[command(about = "Real-time price and risk analytics for SPL tokens", version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "mintpulse.toml")]
    config: String,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    dry_run: bool,
}

fn init_logging(config: &ServiceConfig, override_level: Option<String>) {
    let level = override_level.unwrap_or_else(|| config.monitoring.log_level.clone());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if config.monitoring.structured_logging {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn mask_url(url: &str) -> String {
    match url.split_once('@') {
        Some((_, host)) => format!("***@{}", host),
        None => url.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if std::path::Path::new(&cli.config).exists() {
        ServiceConfig::from_file(&cli.config)?
    } else {
        ServiceConfig::from_env()?
    };

    init_logging(&config, cli.log_level);

    info!("mintpulse v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Environment: {}", config.server.environment);
    info!("  HTTP: {}:{}", config.server.bind_address, config.server.port);
    info!("  Database: {}", mask_url(&config.database.url));
    info!("  Redis: {}", mask_url(&config.redis.url));
    info!("  Chain RPC: {}", config.chain.rpc_url);
    info!("  Poll period: {} ms", config.scheduler.poll_ms);
    info!("  Workers: {}", config.scheduler.workers);

    if cli.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        return Ok(());
    }

    // Storage layers.
    let cache = Arc::new(RedisCache::new(&config.redis.url).await?);
    let store = Arc::new(
        PostgresStore::new(&config.database.url, config.database.max_connections).await?,
    );
    info!("✓ Storage layers initialized");

    // Chain access.
    let chain = Arc::new(ChainAdapter::new(
        config.chain_endpoint(),
        Duration::from_secs(config.chain.request_timeout_secs),
        cache.clone(),
    )?);

    // Quote sources in preference order.
    let aggregator = Arc::new(AggregatorSource::new(
        config.sources.aggregator_url.clone(),
        cache.clone(),
        config.sources.aggregator_cache_ttl_secs,
        Duration::from_millis(config.sources.min_request_interval_ms),
        Duration::from_secs(config.sources.batch_timeout_secs),
    )?);
    let amm_api = Arc::new(AmmApiSource::new(
        config.sources.amm_api_url.clone(),
        Duration::from_secs(config.sources.request_timeout_secs),
    )?);
    let sources: Vec<Arc<dyn QuoteSource>> = vec![aggregator, amm_api];

    let risk = Arc::new(RiskScorer::new(
        config.risk.report_url.clone(),
        cache.clone(),
        config.risk.cache_ttl_secs,
        Duration::from_secs(config.risk.request_timeout_secs),
    )?);

    let validator = Arc::new(TokenValidator::new(
        chain.clone(),
        cache.clone(),
        store.clone(),
    ));
    let engine = Arc::new(PricingEngine::new(
        store.clone(),
        cache.clone(),
        chain.clone(),
        validator,
        sources,
        config.pricing.clone(),
    ));
    engine.log_sources();
    info!("✓ Pricing engine initialized");

    // Scheduler: reconcile persisted mints, then start the worker pool.
    let queue = Arc::new(JobQueue::new(cache.clone()));
    let scheduler = Arc::new(Scheduler::new(
        queue,
        engine.clone(),
        cache.clone(),
        store.clone(),
        config.scheduler.clone(),
    ));
    scheduler.clone().bootstrap().await?;
    let worker_handles = scheduler.clone().start_workers();
    info!("✓ Scheduler bootstrapped, {} workers running", worker_handles.len());

    // Broadcast hub: one process-wide price_update subscription.
    let hub = Arc::new(BroadcastHub::new(engine.clone(), scheduler.clone()));
    hub.clone().start(&cache);
    info!("✓ Broadcast hub attached");

    let state = AppState {
        store,
        cache,
        chain,
        engine,
        scheduler: scheduler.clone(),
        hub,
        risk,
    };
    let api_handle = api::start_server(state, &config.server).await?;
    info!("✓ API server started on port {}", config.server.port);

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    scheduler.shutdown();
    for handle in worker_handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "worker did not stop cleanly");
        }
    }
    api_handle.abort();
    info!("Shutdown complete");

    Ok(())
}
