//! Curated source registry. These are compile-time defaults; intervals,
//! item caps, and the disabled list come from [`Config`] at load time and
//! are baked into immutable descriptors once.

use newswire_common::{Config, SourceDescriptor, SourceKind};

pub struct CuratedSource {
    pub url: &'static str,
    pub name: &'static str,
    pub kind: SourceKind,
    pub category: &'static str,
}

const fn feed(url: &'static str, name: &'static str, category: &'static str) -> CuratedSource {
    CuratedSource {
        url,
        name,
        kind: SourceKind::Feed,
        category,
    }
}

const fn page(url: &'static str, name: &'static str, category: &'static str) -> CuratedSource {
    CuratedSource {
        url,
        name,
        kind: SourceKind::Page,
        category,
    }
}

const fn proxy(url: &'static str, name: &'static str, category: &'static str) -> CuratedSource {
    CuratedSource {
        url,
        name,
        kind: SourceKind::ProxyFeed,
        category,
    }
}

/// The default source set: national wire feeds, a few HTML-only outlets,
/// and proxy-feed endpoints for channel-shaped sources.
pub fn curated_sources() -> Vec<CuratedSource> {
    vec![
        feed("https://tass.ru/rss/index.xml", "TASS", "russia"),
        feed("https://lenta.ru/rss/news", "Lenta.ru", "russia"),
        feed("https://www.rbc.ru/v10/static/rss/rbc_news.rss", "RBC", "russia"),
        feed("https://russian.rt.com/rss/", "RT", "world"),
        feed("https://iz.ru/xml/rss/all.xml", "Izvestia", "russia"),
        feed("https://rg.ru/xml/index.xml", "Rossiyskaya Gazeta", "russia"),
        page("https://dzen.ru/news/rubric/chronologic", "Dzen News", "russia"),
        page("https://ren.tv/news", "REN TV", "russia"),
        page("https://riamo.ru/", "RIAMO", "moscow_region"),
        page("https://360.ru/rubriki/mosobl/", "360 Podmoskovye", "moscow_region"),
        proxy("https://rsshub.app/telegram/channel/interfaxonline", "Interfax (channel)", "russia"),
        proxy("https://rsshub.app/telegram/channel/bbbreaking", "Breaking (channel)", "russia"),
        proxy("https://rsshub.app/telegram/channel/mosregtoday", "MosReg Today (channel)", "moscow_region"),
    ]
}

/// Resolve the curated set against the runtime configuration: per-kind
/// minimum intervals, the per-fetch item cap, and the disabled list.
pub fn registry(config: &Config) -> Vec<SourceDescriptor> {
    curated_sources()
        .into_iter()
        .filter(|s| !config.disabled_sources.iter().any(|d| d == s.url))
        .map(|s| SourceDescriptor {
            id: s.url.to_string(),
            kind: s.kind,
            name: s.name.to_string(),
            category: s.category.to_string(),
            min_interval: match s.kind {
                SourceKind::Feed => config.rss_min_interval,
                SourceKind::Page => config.page_min_interval,
                SourceKind::ProxyFeed => config.proxy_feed_min_interval,
            },
            max_items_per_fetch: config.max_items_per_fetch,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        // from_env would panic without required vars; build directly.
        Config {
            database_url: String::new(),
            deepseek_api_key: String::new(),
            deepseek_endpoint: String::new(),
            ai_timeout: std::time::Duration::from_secs(45),
            ai_daily_budget_usd: 4.0,
            ai_calls_per_tick: 6,
            ai_price_per_ktoken_in_usd: 0.14,
            ai_price_per_ktoken_out_usd: 0.28,
            cache_ttl_hours: 72,
            economy_threshold: 0.8,
            check_interval: std::time::Duration::from_secs(300),
            fetch_timeout: std::time::Duration::from_secs(30),
            max_concurrent_fetches: 4,
            max_items_per_fetch: 30,
            rss_min_interval: std::time::Duration::from_secs(300),
            page_min_interval: std::time::Duration::from_secs(600),
            proxy_feed_min_interval: std::time::Duration::from_secs(900),
            dedup_window_hours: 48,
            freshness_window_hours: 48,
            simhash_max_distance: 10,
            overwrite_republished_items: false,
            disabled_sources: vec!["https://ren.tv/news".to_string()],
        }
    }

    #[test]
    fn registry_applies_kind_intervals_and_disabled_list() {
        let config = test_config();
        let registry = registry(&config);

        assert!(registry.iter().all(|s| s.id != "https://ren.tv/news"));

        let feed = registry
            .iter()
            .find(|s| s.kind == SourceKind::Feed)
            .unwrap();
        assert_eq!(feed.min_interval, config.rss_min_interval);

        let proxy = registry
            .iter()
            .find(|s| s.kind == SourceKind::ProxyFeed)
            .unwrap();
        assert_eq!(proxy.min_interval, config.proxy_feed_min_interval);
    }

    #[test]
    fn curated_ids_are_unique() {
        let sources = curated_sources();
        let mut urls: Vec<_> = sources.iter().map(|s| s.url).collect();
        urls.sort();
        urls.dedup();
        assert_eq!(urls.len(), sources.len());
    }
}
