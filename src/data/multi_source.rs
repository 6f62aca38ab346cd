//! Multi-source history client.
//!
//! Walks the providers in priority order until one returns bars. The first
//! provider with a non-empty answer wins; no quality comparison is made.
//! Each provider attempt goes through that provider's rate limiter and
//! circuit breaker and runs under its own timeout. No provider failure is
//! fatal to the overall fetch: if the chain is exhausted the result is an
//! explicit failure with no source.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{HistoryPeriod, HistoryProvider};
use crate::resilience::{BreakerError, ResilienceRegistry, ServiceError};
use crate::types::Bar;

/// Outcome of one logical history fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceResult {
    /// Provider that answered; `None` when every provider failed.
    pub source: Option<String>,
    pub data: Vec<Bar>,
    pub success: bool,
    pub fetched_at: DateTime<Utc>,
}

impl SourceResult {
    fn found(source: &str, data: Vec<Bar>) -> Self {
        Self {
            source: Some(source.to_string()),
            data,
            success: true,
            fetched_at: Utc::now(),
        }
    }

    fn exhausted() -> Self {
        Self {
            source: None,
            data: Vec::new(),
            success: false,
            fetched_at: Utc::now(),
        }
    }
}

struct CachedResult {
    result: SourceResult,
    stored_at: Instant,
}

pub struct MultiSourceDataClient {
    providers: Vec<Arc<dyn HistoryProvider>>,
    registry: Arc<ResilienceRegistry>,
    attempt_timeout: Duration,
    cache_ttl: Option<Duration>,
    cache: Mutex<HashMap<(String, HistoryPeriod), CachedResult>>,
}

impl MultiSourceDataClient {
    /// `providers` is the fallback chain, highest priority first.
    pub fn new(
        providers: Vec<Arc<dyn HistoryProvider>>,
        registry: Arc<ResilienceRegistry>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            registry,
            attempt_timeout,
            cache_ttl: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Serve repeated fetches for the same symbol and period from memory.
    pub fn with_cache(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Provider names in priority order.
    pub fn available_sources(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Drop cached results for `symbol` so the next fetch goes to the chain.
    pub fn invalidate(&self, symbol: &str) {
        self.cache.lock().retain(|(s, _), _| s != symbol);
    }

    pub async fn get_history(&self, symbol: &str, period: HistoryPeriod) -> SourceResult {
        let key = (symbol.to_string(), period);
        if let Some(ttl) = self.cache_ttl {
            let cache = self.cache.lock();
            if let Some(hit) = cache.get(&key).filter(|c| c.stored_at.elapsed() < ttl) {
                debug!(symbol, "History cache hit");
                return hit.result.clone();
            }
        }

        for provider in &self.providers {
            let name = provider.name();
            match self.attempt(provider.as_ref(), symbol, period).await {
                Ok(bars) if !bars.is_empty() => {
                    info!(symbol, source = name, bars = bars.len(), "History fetched");
                    let result = SourceResult::found(name, bars);
                    if self.cache_ttl.is_some() {
                        self.cache.lock().insert(
                            key,
                            CachedResult {
                                result: result.clone(),
                                stored_at: Instant::now(),
                            },
                        );
                    }
                    return result;
                }
                Ok(_) => {
                    debug!(symbol, source = name, "No data from source, trying next");
                }
                Err(BreakerError::Open { retry_in, .. }) => {
                    debug!(
                        symbol,
                        source = name,
                        retry_in_secs = retry_in.as_secs(),
                        "Source breaker open, skipping"
                    );
                }
                Err(BreakerError::Failed(ServiceError::Transient(msg))) => {
                    info!(symbol, source = name, error = %msg, "Transient error from source, trying next");
                }
                Err(BreakerError::Failed(ServiceError::Rejected(msg))) => {
                    warn!(symbol, source = name, error = %msg, "Source failed, trying next");
                }
            }
        }

        error!(symbol, sources = self.providers.len(), "No source returned data");
        SourceResult::exhausted()
    }

    async fn attempt(
        &self,
        provider: &dyn HistoryProvider,
        symbol: &str,
        period: HistoryPeriod,
    ) -> Result<Vec<Bar>, BreakerError<ServiceError>> {
        let name = provider.name();
        let breaker = self.registry.breaker(name);
        self.registry.rate_limiter().wait_if_needed(name).await;

        let timeout = self.attempt_timeout;
        breaker
            .call(|| async move {
                match tokio::time::timeout(timeout, provider.fetch_history(symbol, period)).await {
                    Ok(r) => r,
                    Err(_) => Err(ServiceError::transient(format!(
                        "{name}: timed out after {}ms",
                        timeout.as_millis()
                    ))),
                }
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
