//! Resilient call wrapper.
//!
//! Composes response caching, rate limiting, circuit breaking, per-attempt
//! timeouts and retry around one logical external operation. Every path
//! out of [`ResilientCall::execute`] is a [`CallOutcome`]; nothing is
//! propagated as an error and nothing panics.
//!
//! Order of work for one `execute`:
//! 1. fresh cache hit → return it
//! 2. wait on the endpoint's rate limiter, call through the breaker
//! 3. transient failure → back off and retry, rejection → stop at once
//! 4. success → refresh cache
//! 5. retries exhausted or breaker open → stale cache if any, else failure

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{BreakerError, ResilienceRegistry, RetryPolicy, ServiceError};

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Why a resilient call produced no live value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallFailure {
    /// The dependency explicitly refused the request. Not retried.
    #[error("rejected: {0}")]
    Rejected(String),
    /// Every attempt failed transiently.
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
    /// The breaker short-circuited the call; nothing was attempted.
    #[error("circuit breaker '{dependency}' is open")]
    BreakerOpen {
        dependency: String,
        retry_in: Duration,
    },
}

/// Result of a resilient call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    /// Fresh value from the dependency.
    Live(T),
    /// Value served from cache within its TTL.
    Cached(T),
    /// Live attempts failed; serving the last cached value past its TTL.
    Stale { value: T, failure: CallFailure },
    /// Live attempts failed and nothing was cached.
    Failed(CallFailure),
}

impl<T> CallOutcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            CallOutcome::Live(v) | CallOutcome::Cached(v) => Some(v),
            CallOutcome::Stale { value, .. } => Some(value),
            CallOutcome::Failed(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        self.into_result().ok()
    }

    /// Stale values count as success; only `Failed` is an error.
    pub fn into_result(self) -> Result<T, CallFailure> {
        match self {
            CallOutcome::Live(v) | CallOutcome::Cached(v) => Ok(v),
            CallOutcome::Stale { value, .. } => Ok(value),
            CallOutcome::Failed(f) => Err(f),
        }
    }

    /// Like [`into_result`](Self::into_result) but a stale value is an
    /// error. Use before acting on the value, e.g. placing an order.
    pub fn into_fresh_result(self) -> Result<T, CallFailure> {
        match self {
            CallOutcome::Live(v) | CallOutcome::Cached(v) => Ok(v),
            CallOutcome::Stale { failure, .. } | CallOutcome::Failed(failure) => Err(failure),
        }
    }

    pub fn failure(&self) -> Option<&CallFailure> {
        match self {
            CallOutcome::Stale { failure, .. } | CallOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, CallOutcome::Live(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, CallOutcome::Stale { .. })
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OperationConfig {
    /// Operation name for logs, e.g. "get_quote".
    pub name: String,
    /// Breaker key.
    pub dependency: String,
    /// Rate-limiter key.
    pub endpoint: String,
    /// `None` disables caching (and with it the stale fallback).
    pub cache_ttl: Option<Duration>,
    pub retry: RetryPolicy,
    /// Per-attempt timeout; an elapsed timeout is a transient failure.
    pub timeout: Duration,
}

impl OperationConfig {
    pub fn new(name: &str, dependency: &str) -> Self {
        Self {
            name: name.to_string(),
            dependency: dependency.to_string(),
            endpoint: dependency.to_string(),
            cache_ttl: None,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CacheEntry<T> {
    value: T,
    stored_at: Instant,
}

/// Keyed response cache. Expired entries are kept for the stale fallback.
struct ResponseCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> ResponseCache<T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn fresh(&self, key: &str, ttl: Duration) -> Option<T> {
        self.entries
            .lock()
            .get(key)
            .filter(|e| e.stored_at.elapsed() < ttl)
            .map(|e| e.value.clone())
    }

    fn any(&self, key: &str) -> Option<(T, Duration)> {
        self.entries
            .lock()
            .get(key)
            .map(|e| (e.value.clone(), e.stored_at.elapsed()))
    }

    fn store(&self, key: &str, value: T) {
        self.entries.lock().insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Resilient call
// ---------------------------------------------------------------------------

/// One logical external operation returning `T`, with its own cache.
pub struct ResilientCall<T> {
    config: OperationConfig,
    registry: Arc<ResilienceRegistry>,
    cache: ResponseCache<T>,
}

impl<T: Clone> ResilientCall<T> {
    pub fn new(config: OperationConfig, registry: Arc<ResilienceRegistry>) -> Self {
        Self {
            config,
            registry,
            cache: ResponseCache::new(),
        }
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Execute the operation for `key` (the cache key, e.g. a symbol).
    ///
    /// `op` is invoked once per attempt.
    pub async fn execute<F, Fut>(&self, key: &str, mut op: F) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        if let Some(ttl) = self.config.cache_ttl {
            if let Some(value) = self.cache.fresh(key, ttl) {
                debug!(operation = %self.config.name, key, "Cache hit");
                return CallOutcome::Cached(value);
            }
        }

        let breaker = self.registry.breaker(&self.config.dependency);
        let retry = &self.config.retry;
        let timeout = self.config.timeout;
        let mut attempt: u32 = 0;

        let failure = loop {
            self.registry
                .rate_limiter()
                .wait_if_needed(&self.config.endpoint)
                .await;

            let pending = op();
            let result = breaker
                .call(move || async move {
                    match tokio::time::timeout(timeout, pending).await {
                        Ok(r) => r,
                        Err(_) => Err(ServiceError::transient(format!(
                            "timed out after {}ms",
                            timeout.as_millis()
                        ))),
                    }
                })
                .await;

            match result {
                Ok(value) => {
                    if self.config.cache_ttl.is_some() {
                        self.cache.store(key, value.clone());
                    }
                    return CallOutcome::Live(value);
                }
                Err(BreakerError::Open {
                    dependency,
                    retry_in,
                }) => {
                    break CallFailure::BreakerOpen {
                        dependency,
                        retry_in,
                    };
                }
                Err(BreakerError::Failed(ServiceError::Rejected(msg))) => {
                    warn!(operation = %self.config.name, key, error = %msg, "Call rejected, not retrying");
                    return CallOutcome::Failed(CallFailure::Rejected(msg));
                }
                Err(BreakerError::Failed(ServiceError::Transient(msg))) => {
                    if attempt >= retry.max_retries {
                        break CallFailure::Exhausted {
                            attempts: attempt + 1,
                            last_error: msg,
                        };
                    }
                    // This failure tripped the breaker; the retry would be refused.
                    if let Some(retry_in) = breaker.retry_in() {
                        debug!(operation = %self.config.name, key, error = %msg, "Breaker opened, not retrying");
                        break CallFailure::BreakerOpen {
                            dependency: breaker.name().to_string(),
                            retry_in,
                        };
                    }
                    let delay = retry.backoff(attempt);
                    warn!(
                        operation = %self.config.name,
                        key,
                        attempt = attempt + 1,
                        max_attempts = retry.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %msg,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        match self.cache.any(key) {
            Some((value, age)) if self.config.cache_ttl.is_some() => {
                warn!(
                    operation = %self.config.name,
                    key,
                    age_secs = age.as_secs(),
                    reason = %failure,
                    "Serving stale cached value"
                );
                CallOutcome::Stale { value, failure }
            }
            _ => {
                warn!(operation = %self.config.name, key, reason = %failure, "Call failed, no fallback");
                CallOutcome::Failed(failure)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
