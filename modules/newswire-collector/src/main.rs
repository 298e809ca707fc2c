use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use deepseek_client::DeepSeekClient;
use newswire_collector::collector::Collector;
use newswire_collector::dedup::{DedupConfig, Deduplicator};
use newswire_collector::fetch::{FeedFetcher, Fetcher, PageFetcher};
use newswire_collector::guard::{EnrichmentGuard, GuardConfig};
use newswire_collector::scheduler::FetchScheduler;
use newswire_collector::sources;
use newswire_collector::stop::StopController;
use newswire_common::{Config, SourceKind};
use newswire_store::{FallbackSettings, MemoryStore, PgStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("newswire=info".parse()?))
        .init();

    info!("Newswire collector starting...");

    let config = Config::from_env();
    config.log_redacted();

    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    store.migrate().await?;

    // Stop flag: fast in-process read with the database as durable truth.
    let local_settings = Arc::new(MemoryStore::new());
    let settings = Arc::new(FallbackSettings::new(local_settings, store.clone()));
    let stop = StopController::new(settings);

    let generator = Arc::new(DeepSeekClient::new(
        &config.deepseek_api_key,
        &config.deepseek_endpoint,
        config.ai_timeout,
    ));

    let mut fetchers: HashMap<SourceKind, Arc<dyn Fetcher>> = HashMap::new();
    fetchers.insert(
        SourceKind::Feed,
        Arc::new(FeedFetcher::new(config.fetch_timeout)),
    );
    fetchers.insert(
        SourceKind::ProxyFeed,
        Arc::new(FeedFetcher::new(config.fetch_timeout)),
    );
    fetchers.insert(
        SourceKind::Page,
        Arc::new(PageFetcher::new(config.fetch_timeout)),
    );

    let registry = sources::registry(&config);
    info!(sources = registry.len(), "Source registry loaded");

    let collector = Collector::new(
        registry,
        FetchScheduler::new(store.clone()),
        Deduplicator::new(
            store.clone(),
            DedupConfig {
                dedup_window: ChronoDuration::hours(config.dedup_window_hours),
                freshness_window: ChronoDuration::hours(config.freshness_window_hours),
                simhash_max_distance: config.simhash_max_distance,
                overwrite_republished: config.overwrite_republished_items,
            },
        ),
        EnrichmentGuard::new(
            store.clone(),
            store.clone(),
            GuardConfig {
                daily_limit_usd: config.ai_daily_budget_usd,
                price_per_ktoken_in_usd: config.ai_price_per_ktoken_in_usd,
                price_per_ktoken_out_usd: config.ai_price_per_ktoken_out_usd,
                cache_ttl: ChronoDuration::hours(config.cache_ttl_hours),
                economy_threshold: config.economy_threshold,
                max_calls_per_tick: config.ai_calls_per_tick,
            },
        ),
        stop,
        fetchers,
        generator,
        config.fetch_timeout,
        config.max_concurrent_fetches,
    );

    let mut ticker = tokio::time::interval(config.check_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let output = collector.run_cycle(Utc::now()).await;
        info!("{}", output.stats);
        for item in &output.items {
            info!(
                url = %item.candidate.url,
                source_id = %item.candidate.source_id,
                summarized = item.summary.is_some(),
                cached = item.summary_cached,
                title = %item.candidate.title,
                "New item"
            );
        }
    }
}
