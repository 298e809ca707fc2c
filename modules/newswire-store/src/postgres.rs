// Postgres implementation of the storage capabilities.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use newswire_common::DeliveredItem;

use crate::error::Result;
use crate::traits::{
    BudgetStore, CacheEntry, CacheStats, CacheStore, DeliveredStore, FetchState, FetchStateStore,
    SettingsStore,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl FetchStateStore for PgStore {
    async fn get(&self, source_id: &str) -> Result<Option<FetchState>> {
        let row = sqlx::query_as::<_, FetchState>(
            "SELECT * FROM fetch_state WHERE source_id = $1",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert(&self, state: &FetchState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fetch_state
                (source_id, next_fetch_at, last_fetch_at, last_status, error_streak, last_error_code)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_id)
            DO UPDATE SET next_fetch_at = EXCLUDED.next_fetch_at,
                          last_fetch_at = EXCLUDED.last_fetch_at,
                          last_status = EXCLUDED.last_status,
                          error_streak = EXCLUDED.error_streak,
                          last_error_code = EXCLUDED.last_error_code
            "#,
        )
        .bind(&state.source_id)
        .bind(state.next_fetch_at)
        .bind(state.last_fetch_at)
        .bind(state.last_status)
        .bind(state.error_streak)
        .bind(state.last_error_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_until(&self, source_id: &str, next_fetch_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fetch_state (source_id, next_fetch_at)
            VALUES ($1, $2)
            ON CONFLICT (source_id)
            DO UPDATE SET next_fetch_at = EXCLUDED.next_fetch_at
            "#,
        )
        .bind(source_id)
        .bind(next_fetch_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_all(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE fetch_state
            SET next_fetch_at = to_timestamp(0),
                error_streak = 0,
                last_error_code = NULL
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DeliveredStore for PgStore {
    async fn checksum_for_url(&self, url_normalized: &str) -> Result<Option<String>> {
        let checksum = sqlx::query_scalar::<_, String>(
            "SELECT content_checksum FROM delivered_items WHERE url_normalized = $1",
        )
        .bind(url_normalized)
        .fetch_optional(&self.pool)
        .await?;
        Ok(checksum)
    }

    async fn url_hash_exists(&self, url_hash: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM delivered_items WHERE url_hash = $1",
        )
        .bind(url_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(found > 0)
    }

    async fn checksum_exists(&self, checksum: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM delivered_items WHERE content_checksum = $1",
        )
        .bind(checksum)
        .fetch_one(&self.pool)
        .await?;
        Ok(found > 0)
    }

    async fn recent_simhashes(&self, since: DateTime<Utc>) -> Result<Vec<u64>> {
        let rows = sqlx::query_scalar::<_, i64>(
            "SELECT content_simhash FROM delivered_items WHERE first_seen_at >= $1",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|h| h as u64).collect())
    }

    async fn upsert(&self, item: &DeliveredItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivered_items
                (url_normalized, url_hash, content_checksum, content_simhash,
                 source_id, published_at, first_seen_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (url_normalized)
            DO UPDATE SET url_hash = EXCLUDED.url_hash,
                          content_checksum = EXCLUDED.content_checksum,
                          content_simhash = EXCLUDED.content_simhash,
                          published_at = EXCLUDED.published_at
            "#,
        )
        .bind(&item.url_normalized)
        .bind(&item.url_hash)
        .bind(&item.content_checksum)
        .bind(item.content_simhash as i64)
        .bind(&item.source_id)
        .bind(item.published_at)
        .bind(item.first_seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for PgStore {
    async fn get_live(&self, cache_key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, CacheEntry>(
            "SELECT * FROM llm_cache WHERE cache_key = $1 AND expires_at > $2",
        )
        .bind(cache_key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO llm_cache
                (cache_key, task_type, response, input_tokens, output_tokens,
                 cost_usd, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (cache_key)
            DO UPDATE SET task_type = EXCLUDED.task_type,
                          response = EXCLUDED.response,
                          input_tokens = EXCLUDED.input_tokens,
                          output_tokens = EXCLUDED.output_tokens,
                          cost_usd = EXCLUDED.cost_usd,
                          created_at = EXCLUDED.created_at,
                          expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&entry.cache_key)
        .bind(&entry.task_type)
        .bind(&entry.response)
        .bind(entry.input_tokens)
        .bind(entry.output_tokens)
        .bind(entry.cost_usd)
        .bind(entry.created_at)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM llm_cache WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats> {
        let (active, expired) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT COUNT(*) FILTER (WHERE expires_at > $1),
                   COUNT(*) FILTER (WHERE expires_at <= $1)
            FROM llm_cache
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(CacheStats { active, expired })
    }
}

#[async_trait]
impl BudgetStore for PgStore {
    async fn accumulated(&self, date: NaiveDate) -> Result<f64> {
        let cost = sqlx::query_scalar::<_, f64>(
            "SELECT accumulated_cost_usd FROM budget WHERE date = $1",
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(cost.unwrap_or(0.0))
    }

    async fn add(&self, date: NaiveDate, cost_usd: f64) -> Result<()> {
        // Single-statement increment so concurrent charges never lose updates.
        sqlx::query(
            r#"
            INSERT INTO budget (date, accumulated_cost_usd)
            VALUES ($1, $2)
            ON CONFLICT (date)
            DO UPDATE SET accumulated_cost_usd = budget.accumulated_cost_usd + EXCLUDED.accumulated_cost_usd
            "#,
        )
        .bind(date)
        .bind(cost_usd)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM system_settings WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_settings (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
