//! Cache-and-budget guard in front of the metered text-generation API.
//!
//! Order matters: the cache is consulted before any budget check, so a
//! cache hit never costs money and still works after the budget is spent.
//! Budget exhaustion is not an error — callers get a `Denied` outcome and
//! continue the pipeline with un-enriched content.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use deepseek_client::{DeepSeekError, GenerationResponse};
use newswire_common::content_checksum;
use newswire_store::{BudgetStore, CacheEntry, CacheStats, CacheStore};

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub daily_limit_usd: f64,
    pub price_per_ktoken_in_usd: f64,
    pub price_per_ktoken_out_usd: f64,
    pub cache_ttl: Duration,
    /// Fraction of the daily limit at which the advisory economy signal
    /// turns on (it never blocks calls by itself).
    pub economy_threshold: f64,
    /// Cap on paid calls within one collection tick; 0 = uncapped.
    pub max_calls_per_tick: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeniedReason {
    BudgetExceeded,
    TickLimitReached,
}

impl std::fmt::Display for DeniedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeniedReason::BudgetExceeded => write!(f, "budget_exceeded"),
            DeniedReason::TickLimitReached => write!(f, "tick_limit_reached"),
        }
    }
}

#[derive(Debug)]
pub enum GuardOutcome {
    /// Response produced by a fresh paid call.
    Fresh(GenerationResponse),
    /// Response served from the cache; no network call, no budget impact.
    Cached(GenerationResponse),
    Denied(DeniedReason),
}

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Enrichment call failed: {0}")]
    Call(#[from] DeepSeekError),

    #[error("Store error: {0}")]
    Store(#[from] newswire_store::StoreError),
}

pub struct EnrichmentGuard {
    cache: Arc<dyn CacheStore>,
    budget: Arc<dyn BudgetStore>,
    config: GuardConfig,
    calls_this_tick: AtomicU32,
}

impl EnrichmentGuard {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        budget: Arc<dyn BudgetStore>,
        config: GuardConfig,
    ) -> Self {
        Self {
            cache,
            budget,
            config,
            calls_this_tick: AtomicU32::new(0),
        }
    }

    /// Deterministic cache key from task type and normalized inputs.
    pub fn cache_key(task_type: &str, inputs: &str) -> String {
        let normalized = inputs.trim().to_lowercase();
        content_checksum(&format!("{task_type}|{normalized}"))
    }

    /// Reset the per-tick call counter. Called once per collection cycle.
    pub fn begin_tick(&self) {
        self.calls_this_tick.store(0, Ordering::SeqCst);
    }

    pub async fn try_get_cached(
        &self,
        task_type: &str,
        inputs: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<GenerationResponse>, GuardError> {
        let key = Self::cache_key(task_type, inputs);
        let entry = self.cache.get_live(&key, now).await?;
        Ok(entry.map(|e| GenerationResponse {
            text: e.response,
            input_tokens: e.input_tokens as u32,
            output_tokens: e.output_tokens as u32,
        }))
    }

    /// Advisory economy signal: true once today's spend crosses the
    /// threshold fraction of the daily limit.
    pub async fn is_near_limit(&self, now: DateTime<Utc>) -> bool {
        match self.budget.accumulated(now.date_naive()).await {
            Ok(spent) => spent >= self.config.economy_threshold * self.config.daily_limit_usd,
            Err(e) => {
                warn!(error = %e, "Budget read failed for economy check");
                false
            }
        }
    }

    /// The guarded path to the paid API: cache, then budget, then the call.
    pub async fn guarded_call<F, Fut>(
        &self,
        task_type: &str,
        inputs: &str,
        now: DateTime<Utc>,
        call: F,
    ) -> Result<GuardOutcome, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<GenerationResponse, DeepSeekError>>,
    {
        let key = Self::cache_key(task_type, inputs);

        // 1. Cache, before any budget logic.
        if let Some(entry) = self.cache.get_live(&key, now).await? {
            debug!(task_type, key = &key[..16], "Enrichment cache hit");
            return Ok(GuardOutcome::Cached(GenerationResponse {
                text: entry.response,
                input_tokens: entry.input_tokens as u32,
                output_tokens: entry.output_tokens as u32,
            }));
        }

        // 2. Per-tick call gate. A slot is reserved up front so concurrent
        //    calls cannot overshoot the cap, and released again whenever no
        //    paid call actually happens.
        let effective_cap = self.effective_tick_cap(now).await;
        let reserved = effective_cap > 0;
        if reserved
            && self
                .calls_this_tick
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < effective_cap).then_some(n + 1)
                })
                .is_err()
        {
            return Ok(GuardOutcome::Denied(DeniedReason::TickLimitReached));
        }

        // 3. Daily budget.
        let today = now.date_naive();
        let spent = match self.budget.accumulated(today).await {
            Ok(spent) => spent,
            Err(e) => {
                self.release_slot(reserved);
                return Err(e.into());
            }
        };
        if spent >= self.config.daily_limit_usd {
            self.release_slot(reserved);
            info!(
                spent_usd = spent,
                limit_usd = self.config.daily_limit_usd,
                "Daily enrichment budget exceeded, denying call"
            );
            return Ok(GuardOutcome::Denied(DeniedReason::BudgetExceeded));
        }

        // 4. The paid call. On failure: no cache write, no charge, and the
        //    tick slot goes back.
        let response = match call().await {
            Ok(response) => response,
            Err(e) => {
                self.release_slot(reserved);
                return Err(e.into());
            }
        };

        let cost_usd = self.cost_usd(response.input_tokens, response.output_tokens);
        self.cache
            .put(&CacheEntry {
                cache_key: key,
                task_type: task_type.to_string(),
                response: response.text.clone(),
                input_tokens: response.input_tokens as i32,
                output_tokens: response.output_tokens as i32,
                cost_usd,
                created_at: now,
                expires_at: now + self.config.cache_ttl,
            })
            .await?;
        self.budget.add(today, cost_usd).await?;

        debug!(task_type, cost_usd, "Enrichment call charged and cached");
        Ok(GuardOutcome::Fresh(response))
    }

    pub async fn evict_expired(&self, now: DateTime<Utc>) -> Result<u64, GuardError> {
        Ok(self.cache.evict_expired(now).await?)
    }

    pub async fn cache_stats(&self, now: DateTime<Utc>) -> Result<CacheStats, GuardError> {
        Ok(self.cache.stats(now).await?)
    }

    fn release_slot(&self, reserved: bool) {
        if reserved {
            self.calls_this_tick.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn cost_usd(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        input_tokens as f64 * self.config.price_per_ktoken_in_usd / 1000.0
            + output_tokens as f64 * self.config.price_per_ktoken_out_usd / 1000.0
    }

    /// Economy mode halves the per-tick cap — an advisory reduction in
    /// call frequency, not a denial of service.
    async fn effective_tick_cap(&self, now: DateTime<Utc>) -> u32 {
        let cap = self.config.max_calls_per_tick;
        if cap > 0 && self.is_near_limit(now).await {
            (cap / 2).max(1)
        } else {
            cap
        }
    }
}
