use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Sources ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// RSS/Atom feed.
    Feed,
    /// Plain HTML page treated as a single-document source.
    Page,
    /// Feed-shaped endpoint produced by a proxy service (e.g. RSSHub
    /// turning channel timelines into feeds). Politer intervals apply.
    ProxyFeed,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Feed => write!(f, "feed"),
            SourceKind::Page => write!(f, "page"),
            SourceKind::ProxyFeed => write!(f, "proxy_feed"),
        }
    }
}

/// Immutable per-source configuration, resolved once at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Stable key; the canonical source URL.
    pub id: String,
    pub kind: SourceKind,
    pub name: String,
    pub category: String,
    /// Minimum gap between successful fetches, derived from `kind`.
    pub min_interval: Duration,
    pub max_items_per_fetch: usize,
}

// --- Candidate items ---

/// How much we trust a candidate's publication date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateConfidence {
    /// Explicit timestamp from the feed entry.
    High,
    /// Parsed from page markup.
    Medium,
    /// Heuristic guess.
    Low,
    /// No date available at all.
    None,
}

/// A raw item produced by a fetcher. Transient: either becomes a
/// [`DeliveredItem`] or is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateItem {
    pub url: String,
    pub title: String,
    pub raw_text: String,
    pub published_at: Option<DateTime<Utc>>,
    pub date_confidence: DateConfidence,
    pub source_id: String,
}

impl CandidateItem {
    /// Malformed items are dropped at the ingest boundary before any
    /// store access.
    pub fn is_malformed(&self) -> bool {
        self.url.trim().is_empty() || self.raw_text.trim().is_empty()
    }
}

/// Persisted record of a successfully processed item.
#[derive(Debug, Clone)]
pub struct DeliveredItem {
    pub url_normalized: String,
    pub url_hash: String,
    pub content_checksum: String,
    pub content_simhash: u64,
    pub source_id: String,
    pub published_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
}

// --- Fetching ---

/// Status sentinel used when a fetch produced no HTTP status at all
/// (timeout, connection reset, DNS failure).
pub const STATUS_NETWORK_ERROR: u16 = 0;

/// What a fetcher hands back: an HTTP-like status plus zero or more
/// candidate items. The pipeline never looks inside the fetch itself.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: u16,
    pub items: Vec<CandidateItem>,
}

impl FetchOutcome {
    pub fn failed(status: u16) -> Self {
        Self {
            status,
            items: Vec::new(),
        }
    }
}

/// Scheduler-facing classification of a fetch status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx and 3xx — the source answered.
    Ok,
    /// Rate limiting, transient server trouble, or no response at all.
    /// Retried with an escalating cooldown.
    Soft,
    /// Permission/availability failures that rarely resolve within
    /// minutes. Retried after a long fixed cooldown.
    Hard,
}

impl StatusClass {
    pub fn of(status: u16) -> Self {
        match status {
            200..=399 => StatusClass::Ok,
            401 | 403 | 404 | 410 | 451 => StatusClass::Hard,
            _ => StatusClass::Soft,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_class_boundaries() {
        assert_eq!(StatusClass::of(200), StatusClass::Ok);
        assert_eq!(StatusClass::of(304), StatusClass::Ok);
        assert_eq!(StatusClass::of(429), StatusClass::Soft);
        assert_eq!(StatusClass::of(503), StatusClass::Soft);
        assert_eq!(StatusClass::of(STATUS_NETWORK_ERROR), StatusClass::Soft);
        assert_eq!(StatusClass::of(403), StatusClass::Hard);
        assert_eq!(StatusClass::of(404), StatusClass::Hard);
    }

    #[test]
    fn malformed_candidates_detected() {
        let item = CandidateItem {
            url: "  ".to_string(),
            title: "t".to_string(),
            raw_text: "body".to_string(),
            published_at: None,
            date_confidence: DateConfidence::None,
            source_id: "s".to_string(),
        };
        assert!(item.is_malformed());

        let item = CandidateItem {
            url: "https://example.com/a".to_string(),
            title: String::new(),
            raw_text: "body".to_string(),
            published_at: None,
            date_confidence: DateConfidence::None,
            source_id: "s".to_string(),
        };
        assert!(!item.is_malformed());
    }
}
