// Storage capabilities consumed by the pipeline. Each table is behind its
// own trait so the collector can be wired against Postgres in production
// and the in-memory store in tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use newswire_common::DeliveredItem;

use crate::error::Result;

/// The scheduler's persisted memory, one row per configured source.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FetchState {
    pub source_id: String,
    pub next_fetch_at: DateTime<Utc>,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_status: i32,
    pub error_streak: i32,
    pub last_error_code: Option<i32>,
}

#[async_trait]
pub trait FetchStateStore: Send + Sync {
    async fn get(&self, source_id: &str) -> Result<Option<FetchState>>;

    /// One durable write per fetch attempt. Creates the row lazily.
    async fn upsert(&self, state: &FetchState) -> Result<()>;

    /// In-flight claim: push `next_fetch_at` forward without touching the
    /// attempt bookkeeping, so a slow fetch can't overlap the next tick.
    /// Creates the row if the source has never been fetched.
    async fn claim_until(&self, source_id: &str, next_fetch_at: DateTime<Utc>) -> Result<()>;

    /// Operational reset: make every source immediately due again.
    async fn reset_all(&self) -> Result<u64>;
}

#[async_trait]
pub trait DeliveredStore: Send + Sync {
    /// Checksum of the delivered item with this normalized URL, if any.
    /// The checksum is what the republish policy compares against.
    async fn checksum_for_url(&self, url_normalized: &str) -> Result<Option<String>>;

    async fn url_hash_exists(&self, url_hash: &str) -> Result<bool>;

    async fn checksum_exists(&self, checksum: &str) -> Result<bool>;

    /// Simhashes of items first seen at or after `since`. Similarity
    /// scans never range over the full history.
    async fn recent_simhashes(&self, since: DateTime<Utc>) -> Result<Vec<u64>>;

    async fn upsert(&self, item: &DeliveredItem) -> Result<()>;
}

/// One cached enrichment response, keyed by the deterministic hash of
/// (task type, normalized inputs).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CacheEntry {
    pub cache_key: String,
    pub task_type: String,
    pub response: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub active: i64,
    pub expired: i64,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Entry for this key if it exists and has not expired at `now`.
    async fn get_live(&self, cache_key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>>;

    /// Insert (or supersede) an entry.
    async fn put(&self, entry: &CacheEntry) -> Result<()>;

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats>;
}

#[async_trait]
pub trait BudgetStore: Send + Sync {
    /// Spend accumulated for the given UTC day so far.
    async fn accumulated(&self, date: NaiveDate) -> Result<f64>;

    /// Atomic increment — concurrent charges must never lose updates, so
    /// this is not read-then-write.
    async fn add(&self, date: NaiveDate, cost_usd: f64) -> Result<()>;
}

/// Plain key/value toggles (the global stop flag lives here).
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}
