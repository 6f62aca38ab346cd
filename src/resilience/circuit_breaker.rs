//! Circuit breaker for one named dependency.
//!
//! CLOSED lets calls through and counts failures. Each success while
//! CLOSED decays the failure count by one (leaky bucket, not a strict
//! consecutive-failure counter). Reaching the failure threshold opens the
//! circuit. OPEN rejects calls without touching the dependency until the
//! open duration has elapsed since the last failure; the next call after
//! that moves to HALF_OPEN and is attempted. HALF_OPEN closes after enough
//! successes and reopens on any failure.
//!
//! The OPEN → HALF_OPEN transition happens lazily on the next call, never
//! from a background timer.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::{Classify, FailureKind};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures (after decay) before opening.
    pub failure_threshold: u32,
    /// Successes in HALF_OPEN needed to close.
    pub success_threshold: u32,
    /// How long to stay OPEN after the last failure.
    pub open_duration: Duration,
    /// Error kinds counted as breaker failures. Others pass through uncounted.
    pub failure_kinds: Vec<FailureKind>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(60),
            failure_kinds: vec![FailureKind::Transient, FailureKind::Rejected],
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Snapshot of a breaker's full state, configuration included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: BreakerState,
    pub failures: u32,
    pub successes: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    /// Calls rejected while OPEN. Never counted as failures.
    pub short_circuited: u64,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_duration_secs: u64,
}

/// Error from [`CircuitBreaker::call`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BreakerError<E> {
    /// Short-circuited: the dependency was not called.
    #[error("circuit breaker '{dependency}' is open (retry in {retry_in:?})")]
    Open {
        dependency: String,
        retry_in: Duration,
    },
    /// The dependency was called and failed.
    #[error(transparent)]
    Failed(E),
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    successes: u32,
    last_failure_at: Option<Instant>,
    last_failure: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
    short_circuited: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: 0,
            successes: 0,
            last_failure_at: None,
            last_failure: None,
            last_success: None,
            total_calls: 0,
            total_failures: 0,
            total_successes: 0,
            short_circuited: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Breaker
// ---------------------------------------------------------------------------

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Time left before an open circuit admits a probe. `None` unless OPEN.
    pub fn retry_in(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.state != BreakerState::Open {
            return None;
        }
        let elapsed = inner
            .last_failure_at
            .map(|t| t.elapsed())
            .unwrap_or(self.config.open_duration);
        Some(self.config.open_duration.saturating_sub(elapsed))
    }

    /// Run `f` through the breaker.
    ///
    /// Returns [`BreakerError::Open`] without calling `f` while the circuit
    /// is open, otherwise `f`'s own error wrapped in [`BreakerError::Failed`].
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        self.admit::<E>()?;

        match f().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                let kind = e.failure_kind();
                if self.config.failure_kinds.contains(&kind) {
                    self.on_failure(kind);
                } else {
                    self.inner.lock().last_failure = Some(Utc::now());
                }
                Err(BreakerError::Failed(e))
            }
        }
    }

    /// Decide whether a call may proceed, moving OPEN → HALF_OPEN when the
    /// open duration has elapsed.
    fn admit<E>(&self) -> Result<(), BreakerError<E>> {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;

        if inner.state != BreakerState::Open {
            return Ok(());
        }

        let elapsed = inner
            .last_failure_at
            .map(|t| t.elapsed())
            .unwrap_or(self.config.open_duration);

        if elapsed >= self.config.open_duration {
            inner.state = BreakerState::HalfOpen;
            inner.successes = 0;
            info!(dependency = %self.name, "Circuit breaker half-open, probing dependency");
            Ok(())
        } else {
            inner.short_circuited += 1;
            Err(BreakerError::Open {
                dependency: self.name.clone(),
                retry_in: self.config.open_duration - elapsed,
            })
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        inner.last_success = Some(Utc::now());

        match inner.state {
            BreakerState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    info!(dependency = %self.name, "Circuit breaker closed after recovery");
                }
            }
            BreakerState::Closed => {
                inner.failures = inner.failures.saturating_sub(1);
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self, kind: FailureKind) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.failures += 1;
        inner.last_failure = Some(Utc::now());
        inner.last_failure_at = Some(Instant::now());

        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.successes = 0;
                warn!(dependency = %self.name, %kind, "Circuit breaker reopened, probe failed");
            }
            BreakerState::Closed if inner.failures >= self.config.failure_threshold => {
                inner.state = BreakerState::Open;
                error!(
                    dependency = %self.name,
                    failures = inner.failures,
                    %kind,
                    "Circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Force CLOSED with every counter zeroed.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::new();
        info!(dependency = %self.name, "Circuit breaker reset");
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            last_failure: inner.last_failure,
            last_success: inner.last_success,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            short_circuited: inner.short_circuited,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            open_duration_secs: self.config.open_duration.as_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
