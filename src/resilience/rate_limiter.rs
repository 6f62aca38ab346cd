//! Per-endpoint sliding-window rate limiter.
//!
//! Each key keeps the timestamps of its recent calls. `wait_if_needed`
//! suspends the caller until another call fits inside the window, then
//! records it. Callers sharing a key are serialized on that key's lock, so
//! no more than `max_calls` calls leave any `window` for a given key.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Minimum gap between two "rate limit reached" warnings for one key.
const WARN_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub max_calls: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
        }
    }
}

#[derive(Debug)]
struct CallWindow {
    limit: RateLimit,
    calls: VecDeque<Instant>,
}

impl CallWindow {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.calls.front() {
            if now.duration_since(oldest) >= self.limit.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_full(&self) -> bool {
        self.calls.len() >= self.limit.max_calls as usize
    }
}

/// Registry of call windows keyed by endpoint.
///
/// Keys without a configured limit fall back to `default_limit`; if that is
/// `None` they are never throttled.
pub struct RateLimiter {
    limits: HashMap<String, RateLimit>,
    default_limit: Option<RateLimit>,
    windows: Mutex<HashMap<String, Arc<tokio::sync::Mutex<CallWindow>>>>,
    last_warning: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(limits: HashMap<String, RateLimit>, default_limit: Option<RateLimit>) -> Self {
        Self {
            limits,
            default_limit,
            windows: Mutex::new(HashMap::new()),
            last_warning: Mutex::new(HashMap::new()),
        }
    }

    fn window_for(&self, key: &str) -> Option<Arc<tokio::sync::Mutex<CallWindow>>> {
        let limit = self.limits.get(key).copied().or(self.default_limit)?;
        let mut windows = self.windows.lock();
        let window = windows.entry(key.to_string()).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(CallWindow {
                limit,
                calls: VecDeque::new(),
            }))
        });
        Some(Arc::clone(window))
    }

    /// Suspend until a call to `key` is allowed, then record it.
    ///
    /// Returns true if the caller had to wait.
    pub async fn wait_if_needed(&self, key: &str) -> bool {
        let Some(window) = self.window_for(key) else {
            return false;
        };

        // Held across the sleep: later callers on this key queue behind us.
        let mut window = window.lock().await;
        let mut waited = false;

        loop {
            let now = Instant::now();
            window.prune(now);
            if !window.is_full() {
                break;
            }
            let Some(&oldest) = window.calls.front() else {
                break;
            };
            let wait = (oldest + window.limit.window).saturating_duration_since(now);
            self.warn_throttled(key, wait, window.calls.len(), window.limit.max_calls);
            tokio::time::sleep(wait).await;
            waited = true;
        }

        window.calls.push_back(Instant::now());
        waited
    }

    fn warn_throttled(&self, key: &str, wait: Duration, in_window: usize, max_calls: u32) {
        let now = Instant::now();
        let mut last = self.last_warning.lock();
        let due = last
            .get(key)
            .map(|t| now.duration_since(*t) >= WARN_INTERVAL)
            .unwrap_or(true);
        if due {
            warn!(
                key,
                wait_ms = wait.as_millis() as u64,
                in_window,
                max_calls,
                "Rate limit reached, waiting"
            );
            last.insert(key.to_string(), now);
        } else {
            debug!(key, wait_ms = wait.as_millis() as u64, "Rate limit wait");
        }
    }

    /// Calls still available to `key` in the current window.
    /// `None` if the key is not throttled.
    pub async fn remaining_calls(&self, key: &str) -> Option<u32> {
        let window = self.window_for(key)?;
        let mut window = window.lock().await;
        window.prune(Instant::now());
        Some(window.limit.max_calls.saturating_sub(window.calls.len() as u32))
    }

    /// Forget recorded calls for one key, or for every key.
    pub async fn reset(&self, key: Option<&str>) {
        let targets: Vec<Arc<tokio::sync::Mutex<CallWindow>>> = {
            let windows = self.windows.lock();
            match key {
                Some(k) => windows.get(k).cloned().into_iter().collect(),
                None => windows.values().cloned().collect(),
            }
        };
        for window in targets {
            window.lock().await.calls.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
