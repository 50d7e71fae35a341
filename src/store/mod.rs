//! PostgreSQL persistence: latest-state upsert plus append-only history

use crate::core::{PriceSnapshot, PulseResult};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

const UPSERT_LATEST_SQL: &str = r#"
    INSERT INTO token_prices (mint, price_usd, price_native, market_cap, total_supply, last_updated)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (mint) DO UPDATE SET
        price_usd = EXCLUDED.price_usd,
        price_native = EXCLUDED.price_native,
        market_cap = EXCLUDED.market_cap,
        total_supply = EXCLUDED.total_supply,
        last_updated = EXCLUDED.last_updated
"#;

const APPEND_HISTORY_SQL: &str = r#"
    INSERT INTO price_history (mint, price_usd, price_native, market_cap, at)
    VALUES ($1, $2, $3, $4, $5)
"#;

/// One append-only history row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: i64,
    pub mint: String,
    pub price_usd: f64,
    pub price_native: f64,
    pub market_cap: f64,
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

fn dec(value: f64) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or_default()
}

fn f64_col(row: &PgRow, name: &str) -> f64 {
    row.get::<Decimal, _>(name).to_f64().unwrap_or(0.0)
}

fn snapshot_from_row(row: &PgRow) -> PriceSnapshot {
    PriceSnapshot {
        mint: row.get("mint"),
        price_usd: f64_col(row, "price_usd"),
        price_native: f64_col(row, "price_native"),
        market_cap: f64_col(row, "market_cap"),
        total_supply: f64_col(row, "total_supply"),
        as_of: row.get("last_updated"),
    }
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32) -> PulseResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Insert-or-replace the latest row for a mint
    pub async fn upsert_latest(&self, snapshot: &PriceSnapshot) -> PulseResult<()> {
        sqlx::query(UPSERT_LATEST_SQL)
            .bind(&snapshot.mint)
            .bind(dec(snapshot.price_usd))
            .bind(dec(snapshot.price_native))
            .bind(dec(snapshot.market_cap))
            .bind(dec(snapshot.total_supply))
            .bind(snapshot.as_of)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append one history entry
    pub async fn append_history(&self, snapshot: &PriceSnapshot) -> PulseResult<()> {
        sqlx::query(APPEND_HISTORY_SQL)
            .bind(&snapshot.mint)
            .bind(dec(snapshot.price_usd))
            .bind(dec(snapshot.price_native))
            .bind(dec(snapshot.market_cap))
            .bind(snapshot.as_of)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Latest-state upsert and history append in one transaction.
    ///
    /// This is the only write path the pricing engine uses: either both rows
    /// take effect or neither does.
    pub async fn save_snapshot(&self, snapshot: &PriceSnapshot) -> PulseResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(UPSERT_LATEST_SQL)
            .bind(&snapshot.mint)
            .bind(dec(snapshot.price_usd))
            .bind(dec(snapshot.price_native))
            .bind(dec(snapshot.market_cap))
            .bind(dec(snapshot.total_supply))
            .bind(snapshot.as_of)
            .execute(&mut *tx)
            .await?;

        sqlx::query(APPEND_HISTORY_SQL)
            .bind(&snapshot.mint)
            .bind(dec(snapshot.price_usd))
            .bind(dec(snapshot.price_native))
            .bind(dec(snapshot.market_cap))
            .bind(snapshot.as_of)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_latest(&self, mint: &str) -> PulseResult<Option<PriceSnapshot>> {
        let row = sqlx::query("SELECT * FROM token_prices WHERE mint = $1")
            .bind(mint)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(snapshot_from_row))
    }

    /// Page of latest rows ordered by update time descending, with total count
    pub async fn list_latest(
        &self,
        offset: i64,
        limit: i64,
    ) -> PulseResult<(Vec<PriceSnapshot>, i64)> {
        let rows = sqlx::query(
            "SELECT * FROM token_prices ORDER BY last_updated DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM token_prices")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        Ok((rows.iter().map(snapshot_from_row).collect(), total))
    }

    /// History entries in `[from, to]` ascending by time, capped
    pub async fn history_in_range(
        &self,
        mint: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cap: i64,
    ) -> PulseResult<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, mint, price_usd, price_native, market_cap, at
            FROM price_history
            WHERE mint = $1 AND at >= $2 AND at <= $3
            ORDER BY at ASC
            LIMIT $4
            "#,
        )
        .bind(mint)
        .bind(from)
        .bind(to)
        .bind(cap)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| HistoryEntry {
                id: row.get("id"),
                mint: row.get("mint"),
                price_usd: f64_col(&row, "price_usd"),
                price_native: f64_col(&row, "price_native"),
                market_cap: f64_col(&row, "market_cap"),
                at: row.get("at"),
            })
            .collect())
    }

    /// Every mint with a latest row; used by the scheduler bootstrap
    pub async fn latest_mints(&self) -> PulseResult<Vec<String>> {
        let rows = sqlx::query("SELECT mint FROM token_prices")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("mint")).collect())
    }

    /// Delete the latest row and all history for a mint atomically
    pub async fn purge_mint(&self, mint: &str) -> PulseResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM token_prices WHERE mint = $1")
            .bind(mint)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM price_history WHERE mint = $1")
            .bind(mint)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn health_check(&self) -> PulseResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
