//! Collection cycle orchestrator.
//!
//! One cycle: stop check, due-source selection, concurrent fetches with an
//! outer timeout, then per-item freshness/dedup gates and guarded
//! enrichment. A failing source never aborts the cycle; its failure is
//! recorded and the remaining sources proceed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use tracing::{debug, info, warn};

use deepseek_client::{GenerationRequest, TextGenerator};
use newswire_common::{
    CandidateItem, FetchOutcome, SourceDescriptor, SourceKind, STATUS_NETWORK_ERROR,
};

use crate::dedup::{Deduplicator, Fingerprints};
use crate::fetch::Fetcher;
use crate::guard::{EnrichmentGuard, GuardOutcome};
use crate::scheduler::FetchScheduler;
use crate::stop::StopController;

const SUMMARY_TASK: &str = "summarize";
const SUMMARY_SYSTEM_PROMPT: &str = "You summarize news articles. Respond with two or three \
     plain sentences covering who, what, and when. No preamble, no markdown.";
const SUMMARY_MAX_TOKENS: u32 = 400;
const MAX_ENRICH_INPUT_CHARS: usize = 6000;

/// An item that survived every gate in one cycle.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub candidate: CandidateItem,
    /// Absent when the budget guard denied enrichment.
    pub summary: Option<String>,
    pub summary_cached: bool,
}

#[derive(Debug, Default, Clone)]
pub struct CycleStats {
    pub sources_due: u32,
    pub sources_fetched: u32,
    pub sources_failed: u32,
    pub items_seen: u32,
    pub items_malformed: u32,
    pub items_stale: u32,
    pub items_duplicate: u32,
    pub items_new: u32,
    pub enrichments_fresh: u32,
    pub enrichments_cached: u32,
    pub enrichments_denied: u32,
    pub cache_entries_evicted: u64,
}

impl std::fmt::Display for CycleStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Collection Cycle Complete ===")?;
        writeln!(f, "Sources due:        {}", self.sources_due)?;
        writeln!(f, "Sources fetched:    {}", self.sources_fetched)?;
        writeln!(f, "Sources failed:     {}", self.sources_failed)?;
        writeln!(f, "Items seen:         {}", self.items_seen)?;
        writeln!(f, "Items malformed:    {}", self.items_malformed)?;
        writeln!(f, "Items stale:        {}", self.items_stale)?;
        writeln!(f, "Items duplicate:    {}", self.items_duplicate)?;
        writeln!(f, "Items new:          {}", self.items_new)?;
        writeln!(f, "Enrichment fresh:   {}", self.enrichments_fresh)?;
        writeln!(f, "Enrichment cached:  {}", self.enrichments_cached)?;
        writeln!(f, "Enrichment denied:  {}", self.enrichments_denied)?;
        writeln!(f, "Cache evicted:      {}", self.cache_entries_evicted)?;
        Ok(())
    }
}

pub struct CycleOutput {
    pub stats: CycleStats,
    pub items: Vec<NewItem>,
}

pub struct Collector {
    registry: Vec<SourceDescriptor>,
    scheduler: FetchScheduler,
    dedup: Deduplicator,
    guard: EnrichmentGuard,
    stop: StopController,
    fetchers: HashMap<SourceKind, Arc<dyn Fetcher>>,
    generator: Arc<dyn TextGenerator>,
    fetch_timeout: Duration,
    max_concurrent_fetches: usize,
}

impl Collector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Vec<SourceDescriptor>,
        scheduler: FetchScheduler,
        dedup: Deduplicator,
        guard: EnrichmentGuard,
        stop: StopController,
        fetchers: HashMap<SourceKind, Arc<dyn Fetcher>>,
        generator: Arc<dyn TextGenerator>,
        fetch_timeout: Duration,
        max_concurrent_fetches: usize,
    ) -> Self {
        Self {
            registry,
            scheduler,
            dedup,
            guard,
            stop,
            fetchers,
            generator,
            fetch_timeout,
            max_concurrent_fetches,
        }
    }

    /// Run one collection cycle against the clock value `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleOutput {
        let mut stats = CycleStats::default();
        let mut items = Vec::new();

        if self.stop.is_stopped().await {
            info!("Global stop flag is set, skipping cycle");
            return CycleOutput { stats, items };
        }

        self.guard.begin_tick();
        match self.guard.evict_expired(now).await {
            Ok(evicted) => stats.cache_entries_evicted = evicted,
            Err(e) => warn!(error = %e, "Cache eviction failed"),
        }
        match self.guard.cache_stats(now).await {
            Ok(cache) => debug!(
                active = cache.active,
                expired = cache.expired,
                "Enrichment cache state"
            ),
            Err(e) => warn!(error = %e, "Cache stats read failed"),
        }

        let due = self.scheduler.due_sources(&self.registry, now).await;
        stats.sources_due = due.len() as u32;
        if due.is_empty() {
            return CycleOutput { stats, items };
        }
        info!(due = due.len(), "Fetching due sources");

        let fetched: Vec<(SourceDescriptor, FetchOutcome)> = stream::iter(due)
            .map(|source| async move {
                let outcome = self.fetch_one(&source).await;
                (source, outcome)
            })
            .buffer_unordered(self.max_concurrent_fetches.max(1))
            .collect()
            .await;

        for (source, outcome) in fetched {
            self.scheduler
                .record_attempt(&source, outcome.status, now)
                .await;

            if !(200..400).contains(&outcome.status) {
                stats.sources_failed += 1;
                continue;
            }
            stats.sources_fetched += 1;

            let mut candidates = outcome.items;
            candidates.truncate(source.max_items_per_fetch);

            for candidate in candidates {
                stats.items_seen += 1;
                match self.process_candidate(candidate, now, &mut stats).await {
                    Some(item) => items.push(item),
                    None => continue,
                }
            }
        }

        info!(new_items = items.len(), "Cycle finished");
        CycleOutput { stats, items }
    }

    async fn fetch_one(&self, source: &SourceDescriptor) -> FetchOutcome {
        let Some(fetcher) = self.fetchers.get(&source.kind) else {
            warn!(source_id = %source.id, kind = %source.kind, "No fetcher registered for kind");
            return FetchOutcome::failed(STATUS_NETWORK_ERROR);
        };

        match tokio::time::timeout(self.fetch_timeout, fetcher.fetch(source)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(source_id = %source.id, "Fetch timed out");
                FetchOutcome::failed(STATUS_NETWORK_ERROR)
            }
        }
    }

    /// Gates and enrichment for a single candidate. Returns `None` when
    /// the item is dropped at any gate or a store error forces a skip
    /// (skipped items come back on the next fetch of the source).
    async fn process_candidate(
        &self,
        candidate: CandidateItem,
        now: DateTime<Utc>,
        stats: &mut CycleStats,
    ) -> Option<NewItem> {
        if candidate.is_malformed() {
            stats.items_malformed += 1;
            debug!(source_id = %candidate.source_id, "Dropping malformed candidate");
            return None;
        }

        if self.dedup.is_stale(&candidate, now) {
            stats.items_stale += 1;
            return None;
        }

        let prints = Fingerprints::of(&candidate);
        match self.dedup.is_duplicate(&candidate, &prints, now).await {
            Ok(Some(signal)) => {
                stats.items_duplicate += 1;
                debug!(url = %candidate.url, %signal, "Duplicate candidate");
                return None;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(url = %candidate.url, error = %e, "Duplicate check failed, skipping item");
                return None;
            }
        }

        let (summary, summary_cached) = self.enrich(&candidate, now, stats).await;

        if let Err(e) = self.dedup.register(&candidate, &prints, now).await {
            warn!(url = %candidate.url, error = %e, "Failed to register delivered item");
            return None;
        }

        stats.items_new += 1;
        Some(NewItem {
            candidate,
            summary,
            summary_cached,
        })
    }

    /// Guarded summary generation. Denial and failure both degrade to an
    /// un-enriched item rather than dropping it.
    async fn enrich(
        &self,
        candidate: &CandidateItem,
        now: DateTime<Utc>,
        stats: &mut CycleStats,
    ) -> (Option<String>, bool) {
        let input = enrichment_input(&candidate.title, &candidate.raw_text);
        let generator = self.generator.clone();
        let request = GenerationRequest {
            system_prompt: SUMMARY_SYSTEM_PROMPT.to_string(),
            input: input.clone(),
            temperature: 0.3,
            max_tokens: SUMMARY_MAX_TOKENS,
        };

        let outcome = self
            .guard
            .guarded_call(SUMMARY_TASK, &input, now, move || async move {
                generator.generate(&request).await
            })
            .await;

        match outcome {
            Ok(GuardOutcome::Fresh(r)) => {
                stats.enrichments_fresh += 1;
                (Some(r.text), false)
            }
            Ok(GuardOutcome::Cached(r)) => {
                stats.enrichments_cached += 1;
                (Some(r.text), true)
            }
            Ok(GuardOutcome::Denied(reason)) => {
                stats.enrichments_denied += 1;
                debug!(url = %candidate.url, %reason, "Enrichment denied");
                (None, false)
            }
            Err(e) => {
                warn!(url = %candidate.url, error = %e, "Enrichment failed, delivering without summary");
                (None, false)
            }
        }
    }
}

fn enrichment_input(title: &str, raw_text: &str) -> String {
    let combined = format!("{title}\n\n{raw_text}");
    match combined.char_indices().nth(MAX_ENRICH_INPUT_CHARS) {
        Some((idx, _)) => combined[..idx].to_string(),
        None => combined,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::dedup::DedupConfig;
    use crate::guard::GuardConfig;
    use deepseek_client::{DeepSeekError, GenerationResponse};
    use newswire_common::DateConfidence;
    use newswire_store::MemoryStore;

    struct FakeFetcher {
        outcomes: HashMap<String, FetchOutcome>,
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, source: &SourceDescriptor) -> FetchOutcome {
            self.outcomes
                .get(&source.id)
                .cloned()
                .unwrap_or_else(|| FetchOutcome::failed(STATUS_NETWORK_ERROR))
        }
    }

    struct FakeGenerator {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, DeepSeekError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DeepSeekError::Timeout);
            }
            Ok(GenerationResponse {
                text: "summary".to_string(),
                input_tokens: 100,
                output_tokens: 50,
            })
        }
    }

    fn source(id: &str) -> SourceDescriptor {
        SourceDescriptor {
            id: id.to_string(),
            kind: SourceKind::Feed,
            name: id.to_string(),
            category: "test".to_string(),
            min_interval: Duration::from_secs(300),
            max_items_per_fetch: 2,
        }
    }

    fn item(url: &str, text: &str) -> CandidateItem {
        CandidateItem {
            url: url.to_string(),
            title: format!("title for {url}"),
            raw_text: text.to_string(),
            published_at: None,
            date_confidence: DateConfidence::None,
            source_id: "src".to_string(),
        }
    }

    fn collector(
        registry: Vec<SourceDescriptor>,
        outcomes: HashMap<String, FetchOutcome>,
        generator: Arc<FakeGenerator>,
    ) -> (Collector, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut fetchers: HashMap<SourceKind, Arc<dyn Fetcher>> = HashMap::new();
        fetchers.insert(SourceKind::Feed, Arc::new(FakeFetcher { outcomes }));

        let collector = Collector::new(
            registry,
            FetchScheduler::new(store.clone()),
            Deduplicator::new(
                store.clone(),
                DedupConfig {
                    dedup_window: ChronoDuration::hours(48),
                    freshness_window: ChronoDuration::hours(48),
                    simhash_max_distance: 10,
                    overwrite_republished: false,
                },
            ),
            EnrichmentGuard::new(
                store.clone(),
                store.clone(),
                GuardConfig {
                    daily_limit_usd: 4.0,
                    price_per_ktoken_in_usd: 0.14,
                    price_per_ktoken_out_usd: 0.28,
                    cache_ttl: ChronoDuration::hours(72),
                    economy_threshold: 0.8,
                    max_calls_per_tick: 0,
                },
            ),
            StopController::new(store.clone()),
            fetchers,
            generator,
            Duration::from_secs(5),
            4,
        );
        (collector, store)
    }

    #[tokio::test]
    async fn one_failing_source_does_not_block_others() {
        let good = source("https://good.example/feed");
        let bad = source("https://bad.example/feed");
        let mut outcomes = HashMap::new();
        outcomes.insert(
            good.id.clone(),
            FetchOutcome {
                status: 200,
                items: vec![item(
                    "https://good.example/a",
                    "City council approved the new transit budget on Monday.",
                )],
            },
        );
        outcomes.insert(bad.id.clone(), FetchOutcome::failed(503));

        let generator = Arc::new(FakeGenerator {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let (collector, _) = collector(vec![good, bad], outcomes, generator);

        let output = collector.run_cycle(Utc::now()).await;
        assert_eq!(output.stats.sources_fetched, 1);
        assert_eq!(output.stats.sources_failed, 1);
        assert_eq!(output.stats.items_new, 1);
        assert_eq!(output.items.len(), 1);
        assert_eq!(output.items[0].summary.as_deref(), Some("summary"));
    }

    #[tokio::test]
    async fn items_are_capped_per_fetch() {
        let src = source("https://many.example/feed");
        let mut outcomes = HashMap::new();
        outcomes.insert(
            src.id.clone(),
            FetchOutcome {
                status: 200,
                items: (0..5)
                    .map(|i| {
                        item(
                            &format!("https://many.example/{i}"),
                            &format!("Entirely distinct article body number {i} with its own words."),
                        )
                    })
                    .collect(),
            },
        );

        let generator = Arc::new(FakeGenerator {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let (collector, _) = collector(vec![src], outcomes, generator);

        let output = collector.run_cycle(Utc::now()).await;
        assert_eq!(output.stats.items_seen, 2);
    }

    #[tokio::test]
    async fn stop_flag_skips_entire_cycle() {
        let src = source("https://good.example/feed");
        let mut outcomes = HashMap::new();
        outcomes.insert(
            src.id.clone(),
            FetchOutcome {
                status: 200,
                items: vec![item("https://good.example/a", "Some body text here.")],
            },
        );

        let generator = Arc::new(FakeGenerator {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let (collector, store) = collector(vec![src], outcomes, generator);
        StopController::new(store.clone())
            .set_stopped(true)
            .await
            .unwrap();

        let output = collector.run_cycle(Utc::now()).await;
        assert_eq!(output.stats.sources_due, 0);
        assert!(output.items.is_empty());
        // Nothing was claimed either, so the source is still due.
        assert!(
            newswire_store::FetchStateStore::get(store.as_ref(), "https://good.example/feed")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn enrichment_failure_still_delivers_item() {
        let src = source("https://good.example/feed");
        let mut outcomes = HashMap::new();
        outcomes.insert(
            src.id.clone(),
            FetchOutcome {
                status: 200,
                items: vec![item(
                    "https://good.example/a",
                    "Ministry published updated grain export figures for August.",
                )],
            },
        );

        let generator = Arc::new(FakeGenerator {
            calls: AtomicU32::new(0),
            fail: true,
        });
        let (collector, _) = collector(vec![src], outcomes, generator);

        let output = collector.run_cycle(Utc::now()).await;
        assert_eq!(output.stats.items_new, 1);
        assert!(output.items[0].summary.is_none());
    }

    #[tokio::test]
    async fn second_cycle_skips_duplicates_and_claimed_sources() {
        let src = source("https://good.example/feed");
        let mut outcomes = HashMap::new();
        outcomes.insert(
            src.id.clone(),
            FetchOutcome {
                status: 200,
                items: vec![item(
                    "https://good.example/a",
                    "Regional airport reopened after overnight runway repairs.",
                )],
            },
        );

        let generator = Arc::new(FakeGenerator {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let (collector, _) = collector(vec![src.clone()], outcomes, generator.clone());

        let now = Utc::now();
        let first = collector.run_cycle(now).await;
        assert_eq!(first.stats.items_new, 1);

        // Immediately after, the source is claimed and nothing is due.
        let second = collector.run_cycle(now).await;
        assert_eq!(second.stats.sources_due, 0);

        // Past the interval the source is due again but the item is a dup.
        let later = now + ChronoDuration::seconds(301);
        let third = collector.run_cycle(later).await;
        assert_eq!(third.stats.sources_due, 1);
        assert_eq!(third.stats.items_duplicate, 1);
        assert_eq!(third.stats.items_new, 0);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }
}
