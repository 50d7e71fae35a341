//! Redis cache manager: TTL'd key/value plus the pub/sub transport

#![allow(dependency_on_unit_never_type_fallback)]

use crate::core::{PulseError, PulseResult};
use deadpool_redis::{Config, Pool, Runtime};
use futures::StreamExt;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Cache key conventions. Every keyspace has a single owning component.
pub mod keys {
    pub fn validation(mint: &str) -> String {
        format!("validation:{}", mint)
    }

    pub fn invalid_token(mint: &str) -> String {
        format!("invalid_token:{}", mint)
    }

    pub fn token_info(mint: &str) -> String {
        format!("token_info:{}", mint)
    }

    pub fn token_supply(mint: &str) -> String {
        format!("token_supply:{}", mint)
    }

    pub fn token_decimals(mint: &str) -> String {
        format!("token_decimals:{}", mint)
    }

    pub fn token_price_native(mint: &str) -> String {
        format!("token_price_native:{}", mint)
    }

    pub fn quote(provider: &str, mint: &str) -> String {
        format!("quote:{}:{}", provider, mint)
    }

    pub const NATIVE_USD_PRICE: &str = "native_usd_price";

    pub fn pool(a: &str, b: &str) -> String {
        format!("pool:{}:{}", a, b)
    }

    pub fn rugcheck(mint: &str) -> String {
        format!("rugcheck:{}", mint)
    }

    pub fn top_holders(mint: &str, limit: usize) -> String {
        format!("top_holders:{}:{}", mint, limit)
    }

    /// Prefixes purged when a mint is evicted from the system.
    pub fn purge_prefixes(mint: &str) -> Vec<String> {
        vec![
            format!("validation:{}", mint),
            format!("token_info:{}", mint),
            format!("token_supply:{}", mint),
            format!("token_decimals:{}", mint),
            format!("token_price_native:{}", mint),
            format!("quote:aggregator:{}", mint),
            format!("quote:amm:{}", mint),
            format!("top_holders:{}:", mint),
        ]
    }
}

pub struct RedisCache {
    pool: Pool,
    client: redis::Client,
}

impl RedisCache {
    /// Shared command pool; the job queue issues its own structure commands
    pub(crate) fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn new(redis_url: &str) -> PulseResult<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| PulseError::Cache(e.to_string()))?;
        let client =
            redis::Client::open(redis_url).map_err(|e| PulseError::Cache(e.to_string()))?;

        Ok(Self { pool, client })
    }

    pub async fn get(&self, key: &str) -> PulseResult<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> PulseResult<()> {
        let mut conn = self.pool.get().await?;
        conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    pub async fn set_permanent(&self, key: &str, value: &str) -> PulseResult<()> {
        let mut conn = self.pool.get().await?;
        conn.set(key, value).await?;
        Ok(())
    }

    pub async fn delete(&self, keys: &[String]) -> PulseResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        conn.del(keys).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> PulseResult<bool> {
        let mut conn = self.pool.get().await?;
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    /// Cursor SCAN over `<prefix>*`; never blocks the server with KEYS
    pub async fn scan_prefix(&self, prefix: &str) -> PulseResult<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut found = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await?;
            found.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(found)
    }

    /// Generic JSON read
    pub async fn get_json<T>(&self, key: &str) -> PulseResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.get(key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Generic JSON write with TTL
    pub async fn set_json<T>(&self, key: &str, value: &T, ttl_secs: u64) -> PulseResult<()>
    where
        T: Serialize,
    {
        let json = serde_json::to_string(value)?;
        self.set_with_ttl(key, &json, ttl_secs).await
    }

    /// Publish a message; delivery is fire-and-forget for callers
    pub async fn publish(&self, channel: &str, message: &str) -> PulseResult<()> {
        let mut conn = self.pool.get().await?;
        conn.publish(channel, message).await?;
        Ok(())
    }

    /// Subscribe to a channel on a dedicated connection.
    ///
    /// Messages arrive on the returned receiver; dropping it ends the
    /// listener task, so unsubscribing twice is naturally a no-op. The task
    /// reconnects with a short delay when the connection drops.
    pub fn subscribe(&self, channel: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let channel = channel.to_string();

        tokio::spawn(async move {
            loop {
                let conn = match client.get_async_connection().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "pubsub connect failed, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                let mut pubsub = conn.into_pubsub();
                if let Err(e) = pubsub.subscribe(&channel).await {
                    warn!(channel = %channel, error = %e, "pubsub subscribe failed, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }

                debug!(channel = %channel, "pubsub listener attached");
                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(channel = %channel, error = %e, "undecodable pubsub payload");
                            continue;
                        }
                    };
                    if tx.send(payload).is_err() {
                        // Receiver dropped: the subscription is over.
                        return;
                    }
                }

                warn!(channel = %channel, "pubsub stream ended, reconnecting");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        rx
    }

    pub async fn health_check(&self) -> PulseResult<()> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_conventions() {
        assert_eq!(keys::validation("abc"), "validation:abc");
        assert_eq!(keys::invalid_token("abc"), "invalid_token:abc");
        assert_eq!(keys::quote("aggregator", "abc"), "quote:aggregator:abc");
        assert_eq!(keys::pool("a", "b"), "pool:a:b");
        assert_eq!(keys::top_holders("abc", 10), "top_holders:abc:10");
    }

    #[test]
    fn purge_prefixes_cover_owned_keyspaces() {
        let prefixes = keys::purge_prefixes("m1");
        assert!(prefixes.iter().any(|p| p.starts_with("validation:")));
        assert!(prefixes.iter().any(|p| p.starts_with("token_supply:")));
        assert!(prefixes.iter().any(|p| p.starts_with("quote:aggregator:")));
        // The ban key is owned by the scheduler and must never be purged here.
        assert!(!prefixes.iter().any(|p| p.starts_with("invalid_token:")));
    }
}
