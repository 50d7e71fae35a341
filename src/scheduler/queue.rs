//! Durable repeating job queue on Redis
//!
//! A repeat registry hash plus a delayed ZSET keyed by due time. Claiming a
//! due job races on `ZREM`, whose single-winner semantics guarantee exactly
//! one worker in the cluster runs any given tick.

#![allow(dependency_on_unit_never_type_fallback)]

use crate::cache::RedisCache;
use crate::core::PulseResult;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Every queue-internal key lives under this prefix.
pub const QUEUE_PREFIX: &str = "jobs:";

const REPEAT_KEY: &str = "jobs:repeat";
const DELAYED_KEY: &str = "jobs:delayed";

pub const JOB_STATES: [&str; 6] = [
    "waiting",
    "active",
    "delayed",
    "completed",
    "failed",
    "paused",
];

fn state_key(state: &str) -> String {
    format!("{}state:{}", QUEUE_PREFIX, state)
}

fn payload_key(job_id: &str) -> String {
    format!("{}job:{}", QUEUE_PREFIX, job_id)
}

/// Job id for a mint's repeating price job
pub fn job_id_for(mint: &str) -> String {
    format!("price-{}", mint)
}

/// Inverse of [`job_id_for`]
pub fn mint_of(job_id: &str) -> Option<&str> {
    job_id.strip_prefix("price-")
}

/// Registered repeating job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatSpec {
    pub mint: String,
    pub period_ms: u64,
}

pub struct JobQueue {
    cache: Arc<RedisCache>,
}

impl JobQueue {
    pub fn new(cache: Arc<RedisCache>) -> Self {
        Self { cache }
    }

    /// Register a repeating job and schedule its first run immediately.
    ///
    /// The repeat hash field is the uniqueness point: one field per job id,
    /// cluster-wide.
    pub async fn add_repeating(
        &self,
        job_id: &str,
        spec: &RepeatSpec,
        now_ms: i64,
    ) -> PulseResult<()> {
        let mut conn = self.cache.pool().get().await?;
        let spec_json = serde_json::to_string(spec)?;

        conn.hset(REPEAT_KEY, job_id, &spec_json).await?;
        conn.set(payload_key(job_id), &spec_json).await?;
        conn.zadd(DELAYED_KEY, job_id, now_ms).await?;
        conn.sadd(state_key("delayed"), job_id).await?;
        Ok(())
    }

    /// Remove the repeat registration; scheduled instances die with it
    pub async fn remove_repeating(&self, job_id: &str) -> PulseResult<()> {
        let mut conn = self.cache.pool().get().await?;
        conn.hdel(REPEAT_KEY, job_id).await?;
        conn.zrem(DELAYED_KEY, job_id).await?;
        Ok(())
    }

    /// All registered repeating jobs
    pub async fn list_repeating(&self) -> PulseResult<Vec<(String, RepeatSpec)>> {
        let mut conn = self.cache.pool().get().await?;
        let raw: Vec<(String, String)> = conn.hgetall(REPEAT_KEY).await?;
        let mut jobs = Vec::with_capacity(raw.len());
        for (job_id, spec) in raw {
            match serde_json::from_str(&spec) {
                Ok(spec) => jobs.push((job_id, spec)),
                Err(e) => warn!(job_id = %job_id, error = %e, "undecodable repeat spec"),
            }
        }
        Ok(jobs)
    }

    pub async fn count_repeating(&self) -> PulseResult<i64> {
        let mut conn = self.cache.pool().get().await?;
        let count: i64 = conn.hlen(REPEAT_KEY).await?;
        Ok(count)
    }

    /// Claim one due job, if any.
    ///
    /// Several workers may read the same candidate; only the one whose
    /// `ZREM` returns 1 owns the tick.
    pub async fn claim_due(&self, now_ms: i64) -> PulseResult<Option<(String, RepeatSpec)>> {
        let mut conn = self.cache.pool().get().await?;

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(DELAYED_KEY)
            .arg("-inf")
            .arg(now_ms)
            .arg("LIMIT")
            .arg(0)
            .arg(1)
            .query_async(&mut *conn)
            .await?;
        let Some(job_id) = due.into_iter().next() else {
            return Ok(None);
        };

        let won: i64 = conn.zrem(DELAYED_KEY, &job_id).await?;
        if won == 0 {
            // Another worker claimed it first.
            return Ok(None);
        }

        conn.srem(state_key("delayed"), &job_id).await?;
        conn.sadd(state_key("active"), &job_id).await?;

        let spec: Option<String> = conn.hget(REPEAT_KEY, &job_id).await?;
        match spec {
            Some(spec) => match serde_json::from_str(&spec) {
                Ok(spec) => Ok(Some((job_id, spec))),
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "claimed job with undecodable spec");
                    conn.srem(state_key("active"), &job_id).await?;
                    Ok(None)
                }
            },
            None => {
                // Repeat entry vanished between scheduling and claim
                // (obliterated); drop the orphan instance.
                conn.srem(state_key("active"), &job_id).await?;
                Ok(None)
            }
        }
    }

    /// Finish a claimed tick and, when the job is still registered,
    /// schedule its next occurrence.
    pub async fn complete(&self, job_id: &str, success: bool, now_ms: i64) -> PulseResult<()> {
        let mut conn = self.cache.pool().get().await?;

        conn.srem(state_key("active"), job_id).await?;
        let outcome = if success { "completed" } else { "failed" };
        conn.sadd(state_key(outcome), job_id).await?;

        let spec: Option<String> = conn.hget(REPEAT_KEY, job_id).await?;
        if let Some(spec) = spec {
            if let Ok(spec) = serde_json::from_str::<RepeatSpec>(&spec) {
                let next = now_ms + spec.period_ms as i64;
                conn.zadd(DELAYED_KEY, job_id, next).await?;
                conn.sadd(state_key("delayed"), job_id).await?;
            }
        }
        Ok(())
    }

    /// States currently holding an instance of this job
    pub async fn instance_states(&self, job_id: &str) -> PulseResult<Vec<&'static str>> {
        let mut conn = self.cache.pool().get().await?;
        let mut states = Vec::new();
        for state in JOB_STATES {
            let member: bool = conn.sismember(state_key(state), job_id).await?;
            if member {
                states.push(state);
            }
        }
        Ok(states)
    }

    /// Remove every trace of a job: the repeat entry, all per-state
    /// instances, and any internal key carrying the job id.
    ///
    /// Best-effort by contract: individual failures are logged and the
    /// remaining steps still run.
    pub async fn obliterate(&self, job_id: &str) {
        let mut conn = match self.cache.pool().get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(job_id, error = %e, "obliterate could not reach redis");
                return;
            }
        };

        if let Err(e) = conn.hdel::<_, _, ()>(REPEAT_KEY, job_id).await {
            warn!(job_id, error = %e, "obliterate: repeat entry removal failed");
        }
        if let Err(e) = conn.zrem::<_, _, ()>(DELAYED_KEY, job_id).await {
            warn!(job_id, error = %e, "obliterate: delayed entry removal failed");
        }
        for state in JOB_STATES {
            if let Err(e) = conn.srem::<_, _, ()>(state_key(state), job_id).await {
                warn!(job_id, state, error = %e, "obliterate: state removal failed");
            }
        }
        drop(conn);

        // Sweep any internal key still carrying this job id.
        match self
            .cache
            .scan_prefix(&format!("{}job:{}", QUEUE_PREFIX, job_id))
            .await
        {
            Ok(found) => {
                if let Err(e) = self.cache.delete(&found).await {
                    warn!(job_id, error = %e, "obliterate: internal key delete failed");
                }
            }
            Err(e) => warn!(job_id, error = %e, "obliterate: internal key scan failed"),
        }

        debug!(job_id, "job obliterated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_round_trip() {
        let id = job_id_for("Mint1111111111111111111111111111");
        assert_eq!(id, "price-Mint1111111111111111111111111111");
        assert_eq!(mint_of(&id), Some("Mint1111111111111111111111111111"));
        assert_eq!(mint_of("other-key"), None);
    }

    #[test]
    fn internal_keys_stay_under_prefix() {
        assert!(state_key("active").starts_with(QUEUE_PREFIX));
        assert!(payload_key("price-x").starts_with(QUEUE_PREFIX));
        assert_eq!(REPEAT_KEY, "jobs:repeat");
        assert_eq!(DELAYED_KEY, "jobs:delayed");
    }
}
