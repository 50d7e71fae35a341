//! Risk scorer: external report fetch and taxonomy normalisation

use crate::cache::{keys, RedisCache};
use crate::core::{PulseError, PulseResult};
use crate::quotes::{retry_after_header, Backoff};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SOURCE: &str = "rugcheck";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskSeverity {
    Info,
    Warn,
    Danger,
}

impl RiskSeverity {
    fn parse(raw: &str) -> Self {
        let raw = raw.to_lowercase();
        if raw.starts_with("danger") {
            Self::Danger
        } else if raw.starts_with("warn") {
            Self::Warn
        } else {
            Self::Info
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskItem {
    pub name: String,
    pub description: String,
    pub score: f64,
    pub level: RiskSeverity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSummary {
    pub total: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskReport {
    pub mint: String,
    pub score_normalised: u8,
    pub rugged: bool,
    pub risks: Vec<RiskItem>,
    pub summary: RiskSummary,
    pub overall: RiskLevel,
}

/// `rugged` always dominates; otherwise the normalised score buckets the
/// report (low scores are bad).
pub fn derive_overall(rugged: bool, score_normalised: u8) -> RiskLevel {
    if rugged {
        RiskLevel::Critical
    } else if score_normalised <= 20 {
        RiskLevel::High
    } else if score_normalised <= 50 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Count risk items into the summary buckets
pub fn summarise(risks: &[RiskItem]) -> RiskSummary {
    let mut summary = RiskSummary {
        total: risks.len(),
        high: 0,
        medium: 0,
        low: 0,
    };
    for risk in risks {
        match risk.level {
            RiskSeverity::Danger => summary.high += 1,
            RiskSeverity::Warn => summary.medium += 1,
            RiskSeverity::Info => summary.low += 1,
        }
    }
    summary
}

// Upstream wire types.

#[derive(Debug, Deserialize)]
struct UpstreamReport {
    score: Option<f64>,
    #[serde(rename = "score_normalised")]
    score_normalised: Option<f64>,
    rugged: Option<bool>,
    risks: Option<Vec<UpstreamRisk>>,
}

#[derive(Debug, Deserialize)]
struct UpstreamRisk {
    name: String,
    description: Option<String>,
    score: Option<f64>,
    level: Option<String>,
}

fn normalise(mint: &str, upstream: UpstreamReport) -> RiskReport {
    let score_normalised = upstream
        .score_normalised
        .or(upstream.score)
        .unwrap_or(0.0)
        .clamp(0.0, 100.0) as u8;
    let rugged = upstream.rugged.unwrap_or(false);

    let risks: Vec<RiskItem> = upstream
        .risks
        .unwrap_or_default()
        .into_iter()
        .map(|r| RiskItem {
            level: RiskSeverity::parse(r.level.as_deref().unwrap_or("info")),
            name: r.name,
            description: r.description.unwrap_or_default(),
            score: r.score.unwrap_or(0.0),
        })
        .collect();

    RiskReport {
        mint: mint.to_string(),
        score_normalised,
        rugged,
        summary: summarise(&risks),
        overall: derive_overall(rugged, score_normalised),
        risks,
    }
}

pub struct RiskScorer {
    http: reqwest::Client,
    base_url: String,
    cache: Arc<RedisCache>,
    cache_ttl_secs: u64,
    backoff: Backoff,
}

impl RiskScorer {
    pub fn new(
        base_url: String,
        cache: Arc<RedisCache>,
        cache_ttl_secs: u64,
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
            cache_ttl_secs,
            backoff: Backoff::new(SOURCE),
        })
    }

    /// Fetch (or serve from cache) the risk report for a mint.
    ///
    /// `Ok(None)` means the mint is simply not indexed; a throttle response
    /// surfaces as `Throttled`, never as `None`.
    pub async fn report(&self, mint: &str) -> PulseResult<Option<RiskReport>> {
        let cache_key = keys::rugcheck(mint);
        if let Ok(Some(raw)) = self.cache.get(&cache_key).await {
            if let Ok(cached) = serde_json::from_str::<Option<RiskReport>>(&raw) {
                crate::metrics::global()
                    .cache_hits
                    .with_label_values(&["risk"])
                    .inc();
                return Ok(cached);
            }
        }
        crate::metrics::global()
            .cache_misses
            .with_label_values(&["risk"])
            .inc();

        self.backoff.check().await?;

        let url = format!("{}/tokens/{}/report/summary", self.base_url, mint);
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

        let report = match response.status().as_u16() {
            404 => None,
            429 => {
                let retry_after = retry_after_header(&response);
                return Err(self.backoff.note(retry_after).await);
            }
            status if response.status().is_success() => {
                let upstream: UpstreamReport = response
                    .json()
                    .await
                    .map_err(|e| PulseError::upstream(SOURCE, e.to_string()))?;
                debug!(mint, status, "risk report fetched");
                Some(normalise(mint, upstream))
            }
            status => {
                crate::metrics::global()
                    .upstream_failures
                    .with_label_values(&[SOURCE])
                    .inc();
                return Err(PulseError::upstream(SOURCE, format!("status {}", status)));
            }
        };

        // Negative outcomes are cached too; not-indexed mints stay quiet for
        // the full TTL.
        if let Err(e) = self
            .cache
            .set_with_ttl(
                &cache_key,
                &serde_json::to_string(&report)?,
                self.cache_ttl_secs,
            )
            .await
        {
            warn!(mint, error = %e, "failed to cache risk report");
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(level: RiskSeverity) -> RiskItem {
        RiskItem {
            name: "x".to_string(),
            description: String::new(),
            score: 1.0,
            level,
        }
    }

    #[test]
    fn overall_derivation() {
        assert_eq!(derive_overall(true, 99), RiskLevel::Critical);
        assert_eq!(derive_overall(false, 0), RiskLevel::High);
        assert_eq!(derive_overall(false, 20), RiskLevel::High);
        assert_eq!(derive_overall(false, 21), RiskLevel::Medium);
        assert_eq!(derive_overall(false, 50), RiskLevel::Medium);
        assert_eq!(derive_overall(false, 51), RiskLevel::Low);
        assert_eq!(derive_overall(false, 100), RiskLevel::Low);
    }

    #[test]
    fn summary_counts_levels() {
        let risks = vec![
            item(RiskSeverity::Danger),
            item(RiskSeverity::Danger),
            item(RiskSeverity::Warn),
            item(RiskSeverity::Info),
        ];
        let summary = summarise(&risks);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.high, 2);
        assert_eq!(summary.medium, 1);
        assert_eq!(summary.low, 1);
    }

    #[test]
    fn severity_parsing_is_loose() {
        assert_eq!(RiskSeverity::parse("danger"), RiskSeverity::Danger);
        assert_eq!(RiskSeverity::parse("Danger"), RiskSeverity::Danger);
        assert_eq!(RiskSeverity::parse("warning"), RiskSeverity::Warn);
        assert_eq!(RiskSeverity::parse("warn"), RiskSeverity::Warn);
        assert_eq!(RiskSeverity::parse("info"), RiskSeverity::Info);
        assert_eq!(RiskSeverity::parse("unknown"), RiskSeverity::Info);
    }

    #[test]
    fn normalise_clamps_score_and_derives_fields() {
        let upstream = UpstreamReport {
            score: Some(3000.0),
            score_normalised: None,
            rugged: Some(false),
            risks: Some(vec![UpstreamRisk {
                name: "top holders".to_string(),
                description: None,
                score: Some(500.0),
                level: Some("danger".to_string()),
            }]),
        };
        let report = normalise("m1", upstream);
        assert_eq!(report.score_normalised, 100);
        assert_eq!(report.overall, RiskLevel::Low);
        assert_eq!(report.summary.high, 1);
    }

    #[test]
    fn rugged_dominates_normalisation() {
        let upstream = UpstreamReport {
            score: None,
            score_normalised: Some(95.0),
            rugged: Some(true),
            risks: None,
        };
        let report = normalise("m1", upstream);
        assert_eq!(report.overall, RiskLevel::Critical);
    }
}
