//! Prometheus metrics registry and text exposition

use once_cell::sync::Lazy;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Process-wide metrics registry
static METRICS: Lazy<Arc<PulseMetrics>> = Lazy::new(|| Arc::new(PulseMetrics::new()));

pub fn global() -> Arc<PulseMetrics> {
    METRICS.clone()
}

pub struct PulseMetrics {
    registry: Registry,

    // Scheduler ticks
    pub ticks_total: IntCounter,
    pub ticks_invalid: IntCounter,
    pub ticks_failed: IntCounter,
    pub tick_duration: Histogram,

    // Upstream calls by source
    pub upstream_requests: IntCounterVec,
    pub upstream_failures: IntCounterVec,
    pub upstream_throttled: IntCounterVec,

    // Cache behaviour
    pub cache_hits: IntCounterVec,
    pub cache_misses: IntCounterVec,

    // Live state
    pub active_jobs: IntGauge,
    pub connected_clients: IntGauge,
    pub subscriptions: IntGauge,
    pub snapshots_published: IntCounter,
}

impl PulseMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let ticks_total = IntCounter::with_opts(Opts::new(
            "pulse_ticks_total",
            "Price update ticks executed",
        ))
        .unwrap();
        registry.register(Box::new(ticks_total.clone())).unwrap();

        let ticks_invalid = IntCounter::with_opts(Opts::new(
            "pulse_ticks_invalid",
            "Ticks that detected an invalid mint and triggered ban-and-remove",
        ))
        .unwrap();
        registry.register(Box::new(ticks_invalid.clone())).unwrap();

        let ticks_failed = IntCounter::with_opts(Opts::new(
            "pulse_ticks_failed",
            "Ticks that failed transiently and were skipped",
        ))
        .unwrap();
        registry.register(Box::new(ticks_failed.clone())).unwrap();

        let tick_duration = Histogram::with_opts(
            HistogramOpts::new("pulse_tick_duration_seconds", "Price update tick latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )
        .unwrap();
        registry.register(Box::new(tick_duration.clone())).unwrap();

        let upstream_requests = IntCounterVec::new(
            Opts::new("pulse_upstream_requests", "Outbound upstream requests"),
            &["source"],
        )
        .unwrap();
        registry
            .register(Box::new(upstream_requests.clone()))
            .unwrap();

        let upstream_failures = IntCounterVec::new(
            Opts::new("pulse_upstream_failures", "Failed upstream requests"),
            &["source"],
        )
        .unwrap();
        registry
            .register(Box::new(upstream_failures.clone()))
            .unwrap();

        let upstream_throttled = IntCounterVec::new(
            Opts::new("pulse_upstream_throttled", "Upstream throttle responses"),
            &["source"],
        )
        .unwrap();
        registry
            .register(Box::new(upstream_throttled.clone()))
            .unwrap();

        let cache_hits = IntCounterVec::new(
            Opts::new("pulse_cache_hits", "Cache hits by keyspace"),
            &["keyspace"],
        )
        .unwrap();
        registry.register(Box::new(cache_hits.clone())).unwrap();

        let cache_misses = IntCounterVec::new(
            Opts::new("pulse_cache_misses", "Cache misses by keyspace"),
            &["keyspace"],
        )
        .unwrap();
        registry.register(Box::new(cache_misses.clone())).unwrap();

        let active_jobs = IntGauge::with_opts(Opts::new(
            "pulse_active_jobs",
            "Repeating price jobs currently registered",
        ))
        .unwrap();
        registry.register(Box::new(active_jobs.clone())).unwrap();

        let connected_clients = IntGauge::with_opts(Opts::new(
            "pulse_connected_clients",
            "Live websocket connections",
        ))
        .unwrap();
        registry
            .register(Box::new(connected_clients.clone()))
            .unwrap();

        let subscriptions = IntGauge::with_opts(Opts::new(
            "pulse_subscriptions",
            "Live (connection, mint) subscription pairs",
        ))
        .unwrap();
        registry.register(Box::new(subscriptions.clone())).unwrap();

        let snapshots_published = IntCounter::with_opts(Opts::new(
            "pulse_snapshots_published",
            "Snapshots committed and announced on the price_update channel",
        ))
        .unwrap();
        registry
            .register(Box::new(snapshots_published.clone()))
            .unwrap();

        Self {
            registry,
            ticks_total,
            ticks_invalid,
            ticks_failed,
            tick_duration,
            upstream_requests,
            upstream_failures,
            upstream_throttled,
            cache_hits,
            cache_misses,
            active_jobs,
            connected_clients,
            subscriptions,
            snapshots_published,
        }
    }

    /// Render the registry in Prometheus text exposition format
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_contains_registered_families() {
        let metrics = global();
        metrics.ticks_total.inc();
        metrics.upstream_requests.with_label_values(&["aggregator"]).inc();

        let text = metrics.encode();
        assert!(text.contains("pulse_ticks_total"));
        assert!(text.contains("pulse_upstream_requests"));
    }
}
