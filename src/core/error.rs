//! Centralized error types for the pricing service

use std::time::Duration;
use thiserror::Error;

/// Main service error type
///
/// Worker ticks and HTTP handlers discriminate on the variant, never on the
/// message: `InvalidMint` is the only kind that mutates state (ban + purge),
/// everything transient is logged and skipped.
#[derive(Error, Debug)]
pub enum PulseError {
    #[error("invalid mint: {reason}")]
    InvalidMint { reason: String },

    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    #[error("upstream {provider} unavailable: {detail}")]
    UpstreamUnavailable {
        provider: &'static str,
        detail: String,
    },

    #[error("throttled by {provider}")]
    Throttled {
        provider: &'static str,
        retry_after: Option<Duration>,
    },

    #[error("mint not indexed by risk provider")]
    NotIndexed,

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PulseError {
    pub fn invalid_mint(reason: impl Into<String>) -> Self {
        Self::InvalidMint {
            reason: reason.into(),
        }
    }

    pub fn upstream(source: &'static str, detail: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            provider: source,
            detail: detail.into(),
        }
    }

    /// Transient failures are retried on the next scheduled tick; they never
    /// trigger a ban.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ChainUnavailable(_) | Self::UpstreamUnavailable { .. } | Self::Throttled { .. }
        )
    }
}

/// Result type alias for service operations
pub type PulseResult<T> = Result<T, PulseError>;

impl From<sqlx::Error> for PulseError {
    fn from(err: sqlx::Error) -> Self {
        PulseError::Persistence(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for PulseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        PulseError::Persistence(err.to_string())
    }
}

impl From<redis::RedisError> for PulseError {
    fn from(err: redis::RedisError) -> Self {
        PulseError::Cache(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for PulseError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        PulseError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for PulseError {
    fn from(err: serde_json::Error) -> Self {
        PulseError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(PulseError::ChainUnavailable("rpc down".into()).is_transient());
        assert!(PulseError::upstream("aggregator", "503").is_transient());
        assert!(PulseError::Throttled {
            provider: "aggregator",
            retry_after: None
        }
        .is_transient());

        assert!(!PulseError::invalid_mint("bad base58").is_transient());
        assert!(!PulseError::Persistence("tx aborted".into()).is_transient());
        assert!(!PulseError::NotIndexed.is_transient());
    }
}
