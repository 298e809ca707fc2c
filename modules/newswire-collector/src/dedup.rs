//! Multi-signal deduplication for candidate items.
//!
//! Signals run in order and short-circuit on the first match:
//!
//! 1. normalized-URL exact match
//! 2. URL hash match (defense against normalization gaps)
//! 3. content checksum match (same content, different URL)
//! 4. simhash within a hamming threshold, bounded to a rolling window —
//!    the same headline topic legitimately recurs weeks later, so
//!    similarity across the whole history would be both expensive and wrong.
//!
//! A separate freshness gate runs before any duplicate logic: a dated item
//! older than the window is stale regardless of duplicate status.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use newswire_common::{
    content_checksum, hamming_distance, normalize_url, simhash64, url_hash, CandidateItem,
    DateConfidence, DeliveredItem,
};
use newswire_store::{DeliveredStore, Result};

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub dedup_window: Duration,
    pub freshness_window: Duration,
    pub simhash_max_distance: u32,
    /// Product policy for a known URL resurfacing with changed content:
    /// false = still a duplicate (default), true = accept and overwrite.
    pub overwrite_republished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupSignal {
    UrlNormalized,
    UrlHash,
    Checksum,
    Simhash,
}

impl std::fmt::Display for DupSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DupSignal::UrlNormalized => write!(f, "url"),
            DupSignal::UrlHash => write!(f, "url_hash"),
            DupSignal::Checksum => write!(f, "checksum"),
            DupSignal::Simhash => write!(f, "simhash"),
        }
    }
}

/// Fingerprints computed once per candidate and shared between the
/// duplicate check and registration.
#[derive(Debug, Clone)]
pub struct Fingerprints {
    pub url_normalized: String,
    pub url_hash: String,
    pub checksum: String,
    pub simhash: u64,
}

impl Fingerprints {
    pub fn of(candidate: &CandidateItem) -> Self {
        Self {
            url_normalized: normalize_url(&candidate.url),
            url_hash: url_hash(&candidate.url),
            checksum: content_checksum(&candidate.raw_text),
            simhash: simhash64(&candidate.raw_text, &candidate.title),
        }
    }
}

pub struct Deduplicator {
    store: Arc<dyn DeliveredStore>,
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn DeliveredStore>, config: DedupConfig) -> Self {
        Self { store, config }
    }

    /// Freshness gate, applied before duplicate checking. An item with a
    /// known publication date older than the window is stale. An undated
    /// item is judged by its first-seen time — fresh at first sight.
    pub fn is_stale(&self, candidate: &CandidateItem, now: DateTime<Utc>) -> bool {
        match (candidate.date_confidence, candidate.published_at) {
            (DateConfidence::None, _) | (_, None) => false,
            (_, Some(published)) => published < now - self.config.freshness_window,
        }
    }

    /// Which signal, if any, marks this candidate as already delivered.
    /// Read-only: calling it twice without an intervening register returns
    /// the same answer.
    pub async fn is_duplicate(
        &self,
        candidate: &CandidateItem,
        prints: &Fingerprints,
        now: DateTime<Utc>,
    ) -> Result<Option<DupSignal>> {
        if let Some(existing_checksum) = self.store.checksum_for_url(&prints.url_normalized).await? {
            if existing_checksum != prints.checksum && self.config.overwrite_republished {
                info!(
                    url = %prints.url_normalized,
                    "Known URL resurfaced with changed content, accepting for overwrite"
                );
                return Ok(None);
            }
            return Ok(Some(DupSignal::UrlNormalized));
        }

        if self.store.url_hash_exists(&prints.url_hash).await? {
            return Ok(Some(DupSignal::UrlHash));
        }

        if self.store.checksum_exists(&prints.checksum).await? {
            return Ok(Some(DupSignal::Checksum));
        }

        let since = now - self.config.dedup_window;
        let recent = self.store.recent_simhashes(since).await?;
        let near = recent
            .iter()
            .any(|h| hamming_distance(*h, prints.simhash) <= self.config.simhash_max_distance);
        if near {
            debug!(url = %candidate.url, "Near-duplicate within dedup window");
            return Ok(Some(DupSignal::Simhash));
        }

        Ok(None)
    }

    /// Persist a delivered item. Called only after the candidate passed
    /// dedup and downstream accepted it. Upserts, so an accepted republish
    /// overwrites the previous row.
    pub async fn register(
        &self,
        candidate: &CandidateItem,
        prints: &Fingerprints,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.store
            .upsert(&DeliveredItem {
                url_normalized: prints.url_normalized.clone(),
                url_hash: prints.url_hash.clone(),
                content_checksum: prints.checksum.clone(),
                content_simhash: prints.simhash,
                source_id: candidate.source_id.clone(),
                published_at: candidate.published_at,
                first_seen_at: now,
            })
            .await
    }
}
