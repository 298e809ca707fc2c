use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
/// Resolved once at startup; per-source settings are baked into
/// [`crate::SourceDescriptor`]s from these values and never re-read.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Enrichment API
    pub deepseek_api_key: String,
    pub deepseek_endpoint: String,
    pub ai_timeout: Duration,
    pub ai_daily_budget_usd: f64,
    pub ai_calls_per_tick: u32,
    pub ai_price_per_ktoken_in_usd: f64,
    pub ai_price_per_ktoken_out_usd: f64,
    pub cache_ttl_hours: i64,
    pub economy_threshold: f64,

    // Collection loop
    pub check_interval: Duration,
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
    pub max_items_per_fetch: usize,

    // Per-kind minimum fetch intervals
    pub rss_min_interval: Duration,
    pub page_min_interval: Duration,
    pub proxy_feed_min_interval: Duration,

    // Dedup
    pub dedup_window_hours: i64,
    pub freshness_window_hours: i64,
    pub simhash_max_distance: u32,
    pub overwrite_republished_items: bool,

    // Sources disabled without a code change (csv of source ids)
    pub disabled_sources: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing or invalid —
    /// a bad budget or interval should never make it past startup.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            deepseek_api_key: required_env("DEEPSEEK_API_KEY"),
            deepseek_endpoint: env_str(
                "DEEPSEEK_API_ENDPOINT",
                "https://api.deepseek.com/v1/chat/completions",
            ),
            ai_timeout: Duration::from_secs(env_parse("AI_TIMEOUT_SECONDS", 45)),
            ai_daily_budget_usd: env_parse("AI_DAILY_BUDGET_USD", 4.0),
            ai_calls_per_tick: env_parse("AI_CALLS_PER_TICK", 6),
            ai_price_per_ktoken_in_usd: env_parse("AI_PRICE_PER_KTOKEN_IN_USD", 0.14),
            ai_price_per_ktoken_out_usd: env_parse("AI_PRICE_PER_KTOKEN_OUT_USD", 0.28),
            cache_ttl_hours: env_parse("CACHE_TTL_HOURS", 72),
            economy_threshold: env_parse("ECONOMY_THRESHOLD", 0.8),
            check_interval: Duration::from_secs(env_parse("CHECK_INTERVAL_SECONDS", 300)),
            fetch_timeout: Duration::from_secs(env_parse("FETCH_TIMEOUT_SECONDS", 30)),
            max_concurrent_fetches: env_parse("MAX_CONCURRENT_FETCHES", 4),
            max_items_per_fetch: env_parse("MAX_ITEMS_PER_FETCH", 30),
            rss_min_interval: Duration::from_secs(env_parse("RSS_MIN_INTERVAL_SECONDS", 300)),
            page_min_interval: Duration::from_secs(env_parse("PAGE_MIN_INTERVAL_SECONDS", 600)),
            proxy_feed_min_interval: Duration::from_secs(env_parse(
                "PROXY_FEED_MIN_INTERVAL_SECONDS",
                900,
            )),
            dedup_window_hours: env_parse("DEDUP_WINDOW_HOURS", 48),
            freshness_window_hours: env_parse("FRESHNESS_WINDOW_HOURS", 48),
            simhash_max_distance: env_parse("SIMHASH_MAX_DISTANCE", 10),
            overwrite_republished_items: env_bool("OVERWRITE_REPUBLISHED_ITEMS", false),
            disabled_sources: env_csv("DISABLED_SOURCES"),
        }
    }

    /// Log the effective configuration without leaking secrets.
    pub fn log_redacted(&self) {
        tracing::info!(
            check_interval_s = self.check_interval.as_secs(),
            max_concurrent = self.max_concurrent_fetches,
            daily_budget_usd = self.ai_daily_budget_usd,
            cache_ttl_h = self.cache_ttl_hours,
            dedup_window_h = self.dedup_window_hours,
            disabled_sources = self.disabled_sources.len(),
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid number, got {raw:?}")),
        Err(_) => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn env_csv(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
