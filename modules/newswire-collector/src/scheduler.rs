//! Per-source fetch scheduling with adaptive backoff.
//!
//! The scheduler decides *whether* to fetch: a source is due when it has no
//! recorded state yet or its `next_fetch_at` has passed. Every attempt is
//! recorded durably so the next tick sees accurate state, and `next_fetch_at`
//! only ever moves forward except through the operational reset.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use newswire_common::{SourceDescriptor, StatusClass};
use newswire_store::{FetchState, FetchStateStore};

/// Fixed cooldown for permission/availability errors (401/403/404-class).
/// These rarely resolve within minutes; aggressive retries waste budget and
/// raise suspicion with the remote service.
const HARD_ERROR_COOLDOWN: Duration = Duration::from_secs(4 * 3600);

/// Conservative cooldown used when the state store itself rejects a write:
/// the source comes back for re-evaluation soon instead of being lost.
const STORE_FAILURE_COOLDOWN: Duration = Duration::from_secs(60);

/// Escalating cooldown by consecutive-error streak, added on top of the
/// source's normal interval. Pure so it is testable without any I/O.
/// Capped at one hour — a flaky source must never be starved permanently.
pub fn cooldown(streak: i32) -> Duration {
    match streak {
        i32::MIN..=0 => Duration::ZERO,
        1 => Duration::from_secs(5 * 60),
        2 => Duration::from_secs(30 * 60),
        _ => Duration::from_secs(60 * 60),
    }
}

pub struct FetchScheduler {
    store: Arc<dyn FetchStateStore>,
}

impl FetchScheduler {
    pub fn new(store: Arc<dyn FetchStateStore>) -> Self {
        Self { store }
    }

    /// Pure read: true iff the source has never been fetched or its
    /// `next_fetch_at` has passed. A store outage counts as due — a source
    /// must never be skipped forever over a transient state-store hiccup.
    pub async fn is_due(&self, source_id: &str, now: DateTime<Utc>) -> bool {
        match self.store.get(source_id).await {
            Ok(Some(state)) => now >= state.next_fetch_at,
            Ok(None) => true,
            Err(e) => {
                warn!(source_id, error = %e, "Fetch state read failed, treating source as due");
                true
            }
        }
    }

    /// Which of the configured sources should be fetched now. Each due
    /// source is immediately claimed by advancing `next_fetch_at`, so a
    /// slow fetch cannot overlap with the next tick's decision.
    pub async fn due_sources(
        &self,
        registry: &[SourceDescriptor],
        now: DateTime<Utc>,
    ) -> Vec<SourceDescriptor> {
        let mut due = Vec::new();
        for source in registry {
            if !self.is_due(&source.id, now).await {
                continue;
            }
            let claim_until = now + source.min_interval;
            if let Err(e) = self.store.claim_until(&source.id, claim_until).await {
                warn!(source_id = %source.id, error = %e, "Failed to claim source, fetching anyway");
            }
            due.push(source.clone());
        }
        due
    }

    /// Record the outcome of one fetch attempt. One durable write per
    /// attempt; every branch updates `last_fetch_at`, `last_status`, and
    /// `last_error_code` unconditionally.
    pub async fn record_attempt(&self, source: &SourceDescriptor, status: u16, now: DateTime<Utc>) {
        let previous_streak = match self.store.get(&source.id).await {
            Ok(Some(state)) => state.error_streak,
            Ok(None) => 0,
            Err(e) => {
                warn!(source_id = %source.id, error = %e, "Fetch state read failed before record");
                0
            }
        };

        let class = StatusClass::of(status);
        let (streak, next_fetch_at) = match class {
            StatusClass::Ok => (0, now + source.min_interval),
            StatusClass::Soft => {
                let streak = previous_streak + 1;
                (streak, now + source.min_interval + cooldown(streak))
            }
            StatusClass::Hard => {
                info!(
                    source_id = %source.id,
                    status,
                    "Source unavailable (permission/not-found class), applying long cooldown"
                );
                (previous_streak + 1, now + HARD_ERROR_COOLDOWN)
            }
        };

        let error_code = match class {
            StatusClass::Ok => None,
            _ => Some(status as i32),
        };

        let state = FetchState {
            source_id: source.id.clone(),
            next_fetch_at,
            last_fetch_at: Some(now),
            last_status: status as i32,
            error_streak: streak,
            last_error_code: error_code,
        };

        if let Err(e) = self.store.upsert(&state).await {
            warn!(source_id = %source.id, error = %e, "Fetch state write failed, retrying with short cooldown");
            let fallback = FetchState {
                next_fetch_at: now + STORE_FAILURE_COOLDOWN,
                ..state
            };
            if let Err(e) = self.store.upsert(&fallback).await {
                error!(source_id = %source.id, error = %e, "Fetch state write failed twice, state lost for this attempt");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newswire_store::MemoryStore;

    fn source(id: &str, interval_secs: u64) -> SourceDescriptor {
        SourceDescriptor {
            id: id.to_string(),
            kind: newswire_common::SourceKind::Feed,
            name: id.to_string(),
            category: "russia".to_string(),
            min_interval: Duration::from_secs(interval_secs),
            max_items_per_fetch: 30,
        }
    }

    fn scheduler() -> (FetchScheduler, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (FetchScheduler::new(store.clone()), store)
    }

    #[test]
    fn cooldown_tiers_escalate_and_cap() {
        assert_eq!(cooldown(0), Duration::ZERO);
        assert!(cooldown(1) <= cooldown(2));
        assert!(cooldown(2) <= cooldown(3));
        assert_eq!(cooldown(3), cooldown(17));
        assert_eq!(cooldown(3), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn unknown_source_is_due() {
        let (scheduler, _) = scheduler();
        assert!(scheduler.is_due("never-seen", Utc::now()).await);
    }

    #[tokio::test]
    async fn due_boundary_around_min_interval() {
        let (scheduler, _) = scheduler();
        let src = source("https://example.com/feed", 300);
        let t0 = Utc::now();

        scheduler.record_attempt(&src, 200, t0).await;

        assert!(!scheduler.is_due(&src.id, t0 + chrono::Duration::seconds(299)).await);
        assert!(scheduler.is_due(&src.id, t0 + chrono::Duration::seconds(301)).await);
    }

    #[tokio::test]
    async fn next_fetch_never_before_now() {
        let (scheduler, store) = scheduler();
        let src = source("https://example.com/feed", 300);
        let now = Utc::now();

        for status in [200, 503, 0, 429, 403, 200, 500] {
            scheduler.record_attempt(&src, status, now).await;
            let state = FetchStateStore::get(store.as_ref(), &src.id)
                .await
                .unwrap()
                .unwrap();
            assert!(state.next_fetch_at >= now, "status {status} moved next_fetch_at backwards");
        }
    }

    #[tokio::test]
    async fn soft_errors_escalate_cooldowns() {
        let (scheduler, store) = scheduler();
        let src = source("https://example.com/feed", 300);
        let now = Utc::now();

        let mut gaps = Vec::new();
        for _ in 0..3 {
            scheduler.record_attempt(&src, 503, now).await;
            let state = FetchStateStore::get(store.as_ref(), &src.id)
                .await
                .unwrap()
                .unwrap();
            gaps.push(state.next_fetch_at - now);
        }

        assert!(gaps[0] <= gaps[1] && gaps[1] <= gaps[2]);
        let state = FetchStateStore::get(store.as_ref(), &src.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.error_streak, 3);
        assert_eq!(state.last_error_code, Some(503));
    }

    #[tokio::test]
    async fn success_resets_streak() {
        let (scheduler, store) = scheduler();
        let src = source("https://example.com/feed", 300);
        let now = Utc::now();

        scheduler.record_attempt(&src, 503, now).await;
        scheduler.record_attempt(&src, 503, now).await;
        scheduler.record_attempt(&src, 200, now).await;

        let state = FetchStateStore::get(store.as_ref(), &src.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.error_streak, 0);
        assert_eq!(state.last_status, 200);
        assert_eq!(state.last_error_code, None);
        assert_eq!(state.next_fetch_at, now + src.min_interval);
    }

    #[tokio::test]
    async fn hard_errors_apply_long_cooldown_regardless_of_streak() {
        let (scheduler, store) = scheduler();
        let src = source("https://example.com/feed", 300);
        let now = Utc::now();

        scheduler.record_attempt(&src, 403, now).await;

        let state = FetchStateStore::get(store.as_ref(), &src.id)
            .await
            .unwrap()
            .unwrap();
        let gap = state.next_fetch_at - now;
        assert!(gap >= chrono::Duration::hours(4));
    }

    #[tokio::test]
    async fn due_sources_claims_immediately() {
        let (scheduler, _) = scheduler();
        let src = source("https://example.com/feed", 300);
        let now = Utc::now();

        let due = scheduler.due_sources(&[src.clone()], now).await;
        assert_eq!(due.len(), 1);

        // Second call at the same instant: the claim already advanced
        // next_fetch_at, so a concurrent tick would not double-fetch.
        let due = scheduler.due_sources(&[src], now).await;
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn store_outage_treats_source_as_due() {
        let (scheduler, store) = scheduler();
        store.set_unavailable(true);
        assert!(scheduler.is_due("https://example.com/feed", Utc::now()).await);
    }
}
