// In-memory implementation of the storage capabilities. Serves two jobs:
// the fast half of the dual-store settings path, and a hermetic stand-in
// for Postgres in unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use newswire_common::DeliveredItem;

use crate::error::{Result, StoreError};
use crate::traits::{
    BudgetStore, CacheEntry, CacheStats, CacheStore, DeliveredStore, FetchState, FetchStateStore,
    SettingsStore,
};

#[derive(Default)]
pub struct MemoryStore {
    fetch_state: RwLock<HashMap<String, FetchState>>,
    delivered: RwLock<HashMap<String, DeliveredItem>>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    budget: RwLock<HashMap<NaiveDate, f64>>,
    settings: RwLock<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation returns `StoreError::Unavailable`
    /// until cleared.
    pub fn set_unavailable(&self, value: bool) {
        self.unavailable.store(value, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }

    /// Sum of cache entry costs created on the given UTC day.
    pub async fn cache_cost_for_day(&self, date: NaiveDate) -> f64 {
        self.cache
            .read()
            .await
            .values()
            .filter(|e| e.created_at.date_naive() == date)
            .map(|e| e.cost_usd)
            .sum()
    }
}

#[async_trait]
impl FetchStateStore for MemoryStore {
    async fn get(&self, source_id: &str) -> Result<Option<FetchState>> {
        self.check_available()?;
        Ok(self.fetch_state.read().await.get(source_id).cloned())
    }

    async fn upsert(&self, state: &FetchState) -> Result<()> {
        self.check_available()?;
        self.fetch_state
            .write()
            .await
            .insert(state.source_id.clone(), state.clone());
        Ok(())
    }

    async fn claim_until(&self, source_id: &str, next_fetch_at: DateTime<Utc>) -> Result<()> {
        self.check_available()?;
        let mut map = self.fetch_state.write().await;
        map.entry(source_id.to_string())
            .and_modify(|s| s.next_fetch_at = next_fetch_at)
            .or_insert_with(|| FetchState {
                source_id: source_id.to_string(),
                next_fetch_at,
                last_fetch_at: None,
                last_status: 0,
                error_streak: 0,
                last_error_code: None,
            });
        Ok(())
    }

    async fn reset_all(&self) -> Result<u64> {
        self.check_available()?;
        let mut map = self.fetch_state.write().await;
        let count = map.len() as u64;
        for state in map.values_mut() {
            state.next_fetch_at = DateTime::<Utc>::MIN_UTC;
            state.error_streak = 0;
            state.last_error_code = None;
        }
        Ok(count)
    }
}

#[async_trait]
impl DeliveredStore for MemoryStore {
    async fn checksum_for_url(&self, url_normalized: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self
            .delivered
            .read()
            .await
            .get(url_normalized)
            .map(|i| i.content_checksum.clone()))
    }

    async fn url_hash_exists(&self, url_hash: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self
            .delivered
            .read()
            .await
            .values()
            .any(|i| i.url_hash == url_hash))
    }

    async fn checksum_exists(&self, checksum: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self
            .delivered
            .read()
            .await
            .values()
            .any(|i| i.content_checksum == checksum))
    }

    async fn recent_simhashes(&self, since: DateTime<Utc>) -> Result<Vec<u64>> {
        self.check_available()?;
        Ok(self
            .delivered
            .read()
            .await
            .values()
            .filter(|i| i.first_seen_at >= since)
            .map(|i| i.content_simhash)
            .collect())
    }

    async fn upsert(&self, item: &DeliveredItem) -> Result<()> {
        self.check_available()?;
        self.delivered
            .write()
            .await
            .insert(item.url_normalized.clone(), item.clone());
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_live(&self, cache_key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>> {
        self.check_available()?;
        Ok(self
            .cache
            .read()
            .await
            .get(cache_key)
            .filter(|e| e.expires_at > now)
            .cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.check_available()?;
        self.cache
            .write()
            .await
            .insert(entry.cache_key.clone(), entry.clone());
        Ok(())
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.check_available()?;
        let mut map = self.cache.write().await;
        let before = map.len();
        map.retain(|_, e| e.expires_at > now);
        Ok((before - map.len()) as u64)
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats> {
        self.check_available()?;
        let map = self.cache.read().await;
        let active = map.values().filter(|e| e.expires_at > now).count() as i64;
        Ok(CacheStats {
            active,
            expired: map.len() as i64 - active,
        })
    }
}

#[async_trait]
impl BudgetStore for MemoryStore {
    async fn accumulated(&self, date: NaiveDate) -> Result<f64> {
        self.check_available()?;
        Ok(self.budget.read().await.get(&date).copied().unwrap_or(0.0))
    }

    async fn add(&self, date: NaiveDate, cost_usd: f64) -> Result<()> {
        self.check_available()?;
        *self.budget.write().await.entry(date).or_insert(0.0) += cost_usd;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.settings.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_available()?;
        self.settings
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn budget_add_accumulates_per_day() {
        let store = MemoryStore::new();
        let day = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let other = NaiveDate::from_ymd_opt(2026, 8, 2).unwrap();

        store.add(day, 0.10).await.unwrap();
        store.add(day, 0.25).await.unwrap();
        store.add(other, 1.0).await.unwrap();

        assert!((store.accumulated(day).await.unwrap() - 0.35).abs() < 1e-9);
        assert!((store.accumulated(other).await.unwrap() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cache_expiry_is_treated_as_absent() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let entry = CacheEntry {
            cache_key: "k".into(),
            task_type: "summarize".into(),
            response: "r".into(),
            input_tokens: 1,
            output_tokens: 1,
            cost_usd: 0.0,
            created_at: now - chrono::Duration::hours(73),
            expires_at: now - chrono::Duration::hours(1),
        };
        store.put(&entry).await.unwrap();

        assert!(store.get_live("k", now).await.unwrap().is_none());
        assert_eq!(store.evict_expired(now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reset_all_makes_sources_immediately_due() {
        let store = MemoryStore::new();
        let far_future = Utc::now() + chrono::Duration::hours(6);
        store
            .claim_until("https://example.com/feed", far_future)
            .await
            .unwrap();

        assert_eq!(store.reset_all().await.unwrap(), 1);
        let state = FetchStateStore::get(&store, "https://example.com/feed")
            .await
            .unwrap()
            .unwrap();
        assert!(state.next_fetch_at <= Utc::now());
        assert_eq!(state.error_streak, 0);
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(SettingsStore::get(&store, "any").await.is_err());
        store.set_unavailable(false);
        assert!(SettingsStore::get(&store, "any").await.unwrap().is_none());
    }
}
