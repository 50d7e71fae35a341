//! Quote sources: upstream providers of priced market data

pub mod aggregator;
pub mod amm_api;

pub use aggregator::AggregatorSource;
pub use amm_api::AmmApiSource;

use crate::core::{PulseError, PulseResult, Quote};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Capability every quote source offers.
///
/// `native_usd` is the caller's current native-coin price, used to derive a
/// missing native leg from a USD quote.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn single_quote(&self, mint: &str, native_usd: f64) -> PulseResult<Option<Quote>>;

    async fn batch_quotes(
        &self,
        mints: &[String],
        native_usd: f64,
    ) -> PulseResult<HashMap<String, Quote>> {
        let mut quotes = HashMap::new();
        for mint in mints {
            if let Some(quote) = self.single_quote(mint, native_usd).await? {
                quotes.insert(mint.clone(), quote);
            }
        }
        Ok(quotes)
    }

    /// Price of the native coin in USD, if this source can produce one.
    async fn native_usd_price(&self) -> PulseResult<Option<f64>>;
}

/// Enforces a minimum interval between outbound calls
pub(crate) struct RequestGate {
    last: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RequestGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last: Mutex::new(None),
            min_interval,
        }
    }

    /// Sleep until the floor since the previous call has elapsed
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        let now = Instant::now();
        if let Some(prev) = *last {
            let elapsed = now.duration_since(prev);
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Upstream throttle state shared by a source's callers.
///
/// A 429 pauses all outbound calls to that source for at least two seconds,
/// or for the upstream's own `Retry-After` when it is longer.
pub(crate) struct Backoff {
    source: &'static str,
    until: Mutex<Option<Instant>>,
}

const MIN_BACKOFF: Duration = Duration::from_secs(2);

impl Backoff {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            until: Mutex::new(None),
        }
    }

    /// Fails fast while a throttle pause is in effect
    pub async fn check(&self) -> PulseResult<()> {
        let until = self.until.lock().await;
        if let Some(until) = *until {
            let now = Instant::now();
            if now < until {
                return Err(PulseError::Throttled {
                    provider: self.source,
                    retry_after: Some(until - now),
                });
            }
        }
        Ok(())
    }

    /// Record an upstream throttle signal and return the matching error
    pub async fn note(&self, retry_after: Option<Duration>) -> PulseError {
        let pause = retry_after.unwrap_or(MIN_BACKOFF).max(MIN_BACKOFF);
        let mut until = self.until.lock().await;
        *until = Some(Instant::now() + pause);
        crate::metrics::global()
            .upstream_throttled
            .with_label_values(&[self.source])
            .inc();
        PulseError::Throttled {
            provider: self.source,
            retry_after: Some(pause),
        }
    }
}

/// Parse a Retry-After style header value in seconds
pub(crate) fn retry_after_header(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gate_enforces_floor() {
        let gate = RequestGate::new(Duration::from_millis(50));
        let start = Instant::now();
        gate.wait().await;
        gate.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn backoff_blocks_then_clears() {
        tokio::time::pause();
        let backoff = Backoff::new("aggregator");
        assert!(backoff.check().await.is_ok());

        let err = backoff.note(None).await;
        assert!(matches!(err, PulseError::Throttled { .. }));
        assert!(matches!(
            backoff.check().await,
            Err(PulseError::Throttled { .. })
        ));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(backoff.check().await.is_ok());
    }

    #[tokio::test]
    async fn backoff_honours_longer_retry_after() {
        tokio::time::pause();
        let backoff = Backoff::new("aggregator");
        backoff.note(Some(Duration::from_secs(10))).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(matches!(
            backoff.check().await,
            Err(PulseError::Throttled { .. })
        ));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(backoff.check().await.is_ok());
    }
}
