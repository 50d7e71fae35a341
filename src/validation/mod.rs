//! Token validator: syntactic + on-chain checks with cached verdicts

use crate::cache::{keys, RedisCache};
use crate::chain::ChainAdapter;
use crate::core::{PulseError, PulseResult, NATIVE_MINT};
use crate::store::PostgresStore;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

const VALIDATION_TTL_SECS: u64 = 3600;
const VERDICT_VALID: &str = "valid";
const VERDICT_INVALID_PREFIX: &str = "invalid:";

/// Outcome of a validation check.
///
/// `fresh` marks a verdict that required a chain round-trip this call; only
/// fresh invalid verdicts trigger purges, so a cached one never repeats them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid { reason: String, fresh: bool },
}

/// Result of draining a batch through the validation pipeline
#[derive(Debug, Default)]
pub struct BatchValidation {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
}

/// Cheap structural check before any network traffic
pub fn check_syntax(mint: &str) -> Result<(), String> {
    if mint.len() < 32 || mint.len() > 44 {
        return Err(format!("length {} outside 32..=44", mint.len()));
    }
    let decoded = bs58::decode(mint)
        .into_vec()
        .map_err(|_| "not base58".to_string())?;
    if decoded.len() != 32 {
        return Err(format!("decodes to {} bytes, expected 32", decoded.len()));
    }
    Pubkey::from_str(mint)
        .map(|_| ())
        .map_err(|_| "not a legal public key".to_string())
}

pub struct TokenValidator {
    chain: Arc<ChainAdapter>,
    cache: Arc<RedisCache>,
    store: Arc<PostgresStore>,
}

impl TokenValidator {
    pub fn new(
        chain: Arc<ChainAdapter>,
        cache: Arc<RedisCache>,
        store: Arc<PostgresStore>,
    ) -> Self {
        Self {
            chain,
            cache,
            store,
        }
    }

    /// Full pipeline: native shortcut, syntax, cached verdict, chain check.
    ///
    /// Transient chain failures propagate without being cached, so an RPC
    /// outage can never poison a mint's verdict.
    pub async fn check(&self, mint: &str) -> PulseResult<Verdict> {
        if mint == NATIVE_MINT {
            return Ok(Verdict::Valid);
        }

        if let Err(reason) = check_syntax(mint) {
            return Ok(Verdict::Invalid {
                reason,
                fresh: false,
            });
        }

        let cache_key = keys::validation(mint);
        if let Ok(Some(verdict)) = self.cache.get(&cache_key).await {
            crate::metrics::global()
                .cache_hits
                .with_label_values(&["validation"])
                .inc();
            if verdict == VERDICT_VALID {
                return Ok(Verdict::Valid);
            }
            if let Some(reason) = verdict.strip_prefix(VERDICT_INVALID_PREFIX) {
                return Ok(Verdict::Invalid {
                    reason: reason.to_string(),
                    fresh: false,
                });
            }
        }
        crate::metrics::global()
            .cache_misses
            .with_label_values(&["validation"])
            .inc();

        match self.chain.validate_mint(mint).await {
            Ok(()) => {
                if let Err(e) = self
                    .cache
                    .set_with_ttl(&cache_key, VERDICT_VALID, VALIDATION_TTL_SECS)
                    .await
                {
                    warn!(mint, error = %e, "failed to cache validation verdict");
                }
                Ok(Verdict::Valid)
            }
            Err(PulseError::InvalidMint { reason }) => {
                let verdict = format!("{}{}", VERDICT_INVALID_PREFIX, reason);
                if let Err(e) = self
                    .cache
                    .set_with_ttl(&cache_key, &verdict, VALIDATION_TTL_SECS)
                    .await
                {
                    warn!(mint, error = %e, "failed to cache validation verdict");
                }
                Ok(Verdict::Invalid {
                    reason,
                    fresh: true,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Check that fails with `InvalidMint` instead of returning a verdict
    pub async fn validate(&self, mint: &str) -> PulseResult<()> {
        match self.check(mint).await? {
            Verdict::Valid => Ok(()),
            Verdict::Invalid { reason, .. } => Err(PulseError::InvalidMint { reason }),
        }
    }

    /// Remove all state for an invalid mint: persistent rows plus every
    /// owned cache keyspace. Safe to call repeatedly.
    pub async fn purge_invalid(&self, mint: &str) -> PulseResult<()> {
        info!(mint, "purging invalid mint");
        self.store.purge_mint(mint).await?;

        let mut doomed = Vec::new();
        for prefix in keys::purge_prefixes(mint) {
            match self.cache.scan_prefix(&prefix).await {
                Ok(found) => doomed.extend(found),
                Err(e) => warn!(mint, prefix = %prefix, error = %e, "purge scan failed"),
            }
        }
        self.cache.delete(&doomed).await?;
        Ok(())
    }

    /// Drain a batch through the pipeline; freshly-invalid mints are purged
    /// as a side effect, mints behind a transient failure are skipped.
    pub async fn validate_batch(&self, mints: &[String]) -> BatchValidation {
        let mut outcome = BatchValidation::default();

        for mint in mints {
            match self.check(mint).await {
                Ok(Verdict::Valid) => outcome.valid.push(mint.clone()),
                Ok(Verdict::Invalid { reason, fresh }) => {
                    debug!(mint = %mint, reason, "batch validation rejected mint");
                    if fresh {
                        if let Err(e) = self.purge_invalid(mint).await {
                            warn!(mint = %mint, error = %e, "purge failed");
                        }
                    }
                    outcome.invalid.push(mint.clone());
                }
                Err(e) => {
                    warn!(mint = %mint, error = %e, "validation skipped on transient failure");
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::STABLE_MINT;

    #[test]
    fn syntax_accepts_real_mints() {
        assert!(check_syntax(NATIVE_MINT).is_ok());
        assert!(check_syntax(STABLE_MINT).is_ok());
    }

    #[test]
    fn syntax_rejects_bad_lengths() {
        assert!(check_syntax("short").is_err());
        assert!(check_syntax(&"A".repeat(45)).is_err());
    }

    #[test]
    fn syntax_rejects_non_base58() {
        // 0, O, I and l are outside the base58 alphabet.
        assert!(check_syntax("0OIl000000000000000000000000000000000000").is_err());
        assert!(check_syntax("!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!").is_err());
    }

    #[test]
    fn syntax_rejects_wrong_decoded_width() {
        // Valid base58 and legal length, but decodes to 35 bytes.
        assert!(check_syntax("11111111111111111111111111111111111").is_err());
    }
}
