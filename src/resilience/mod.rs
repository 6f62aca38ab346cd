//! Resilience layer.
//!
//! Everything that stands between the decision loop and an unreliable
//! dependency lives here:
//! - per-dependency circuit breakers (failure isolation)
//! - per-endpoint rate limiters (call throttling)
//! - retry policy with exponential backoff
//! - the resilient call wrapper composing cache + limiter + breaker + retry
//!
//! Breakers and limiters are owned by a single [`ResilienceRegistry`]
//! built at startup and shared by `Arc` with every component that talks
//! to the outside world.

pub mod circuit_breaker;
pub mod client;
pub mod rate_limiter;
pub mod retry;

use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub use circuit_breaker::{BreakerConfig, BreakerError, BreakerState, BreakerStats, CircuitBreaker};
pub use client::{CallFailure, CallOutcome, OperationConfig, ResilientCall};
pub use rate_limiter::{RateLimit, RateLimiter};
pub use retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Kind of failure produced by an attempted external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeout, connection reset, 5xx, 429. Worth retrying.
    Transient,
    /// Explicit rejection (4xx, validation). Retrying will not help.
    Rejected,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Rejected => write!(f, "rejected"),
        }
    }
}

/// Anything a circuit breaker can count must say what kind of failure it is.
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;
}

/// Error returned by a raw external call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

impl ServiceError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transient(_) => FailureKind::Transient,
            Self::Rejected(_) => FailureKind::Rejected,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// Classify a non-success HTTP status.
    ///
    /// 5xx and 429 are transient; every other status is a rejection.
    pub fn from_status(status: StatusCode, context: &str) -> Self {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Self::Transient(format!("{context}: HTTP {status}"))
        } else {
            Self::Rejected(format!("{context}: HTTP {status}"))
        }
    }
}

impl Classify for ServiceError {
    fn failure_kind(&self) -> FailureKind {
        self.kind()
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::from_status(status, "request failed");
        }
        // A payload we cannot decode will not decode any better next time.
        if e.is_decode() || e.is_builder() {
            Self::Rejected(e.to_string())
        } else {
            Self::Transient(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Process-wide owner of every circuit breaker and rate limiter.
///
/// Breakers are created lazily on first use, from the per-name config if
/// one exists and from the defaults otherwise, and live as long as the
/// registry. Each breaker and each rate-limit key carries its own lock.
pub struct ResilienceRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    breaker_configs: HashMap<String, BreakerConfig>,
    default_breaker: BreakerConfig,
    rate_limiter: RateLimiter,
}

impl ResilienceRegistry {
    pub fn new(
        default_breaker: BreakerConfig,
        breaker_configs: HashMap<String, BreakerConfig>,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            breaker_configs,
            default_breaker,
            rate_limiter,
        }
    }

    /// Get (or lazily create) the breaker guarding `dependency`.
    pub fn breaker(&self, dependency: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        if let Some(existing) = breakers.get(dependency) {
            return Arc::clone(existing);
        }

        let config = self
            .breaker_configs
            .get(dependency)
            .cloned()
            .unwrap_or_else(|| self.default_breaker.clone());
        info!(
            dependency,
            failure_threshold = config.failure_threshold,
            open_secs = config.open_duration.as_secs(),
            "Registering circuit breaker"
        );
        let breaker = Arc::new(CircuitBreaker::new(dependency, config));
        breakers.insert(dependency.to_string(), Arc::clone(&breaker));
        breaker
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Statistics for every registered breaker, sorted by name.
    pub fn breaker_stats(&self) -> Vec<BreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.lock().values().cloned().collect();
        let mut stats: Vec<BreakerStats> = breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Force a registered breaker back to CLOSED. Returns false if no
    /// breaker with that name exists yet.
    pub fn reset_breaker(&self, dependency: &str) -> bool {
        let breaker = self.breakers.lock().get(dependency).cloned();
        match breaker {
            Some(b) => {
                b.reset();
                true
            }
            None => false,
        }
    }
}

impl Default for ResilienceRegistry {
    fn default() -> Self {
        Self::new(
            BreakerConfig::default(),
            HashMap::new(),
            RateLimiter::new(HashMap::new(), None),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
