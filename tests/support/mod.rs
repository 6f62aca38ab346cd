//! In-memory fakes shared by the integration tests.
//!
//! Everything here is deterministic and offline: history comes from fixed
//! close series, and the broker is a paper book that can be switched into
//! an outage from test code.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vigil::broker::{BrokerApi, PaperBroker};
use vigil::config::{CycleConfig, PhaseDurations};
use vigil::data::{HistoryPeriod, HistoryProvider};
use vigil::resilience::{BreakerConfig, RateLimit, RateLimiter, ResilienceRegistry, ServiceError};
use vigil::types::{Bar, OrderReceipt, OrderRequest, Position, Quote};

pub const PHASE_SECS: u64 = 10;

pub fn cycle_config() -> CycleConfig {
    CycleConfig {
        phase_durations: PhaseDurations {
            scanning: PHASE_SECS,
            analyzing: PHASE_SECS,
            deciding: PHASE_SECS,
            executing: PHASE_SECS,
            monitoring: PHASE_SECS,
            learning: PHASE_SECS,
            optimizing: PHASE_SECS,
        },
        ..CycleConfig::default()
    }
}

pub fn registry(failure_threshold: u32, open_secs: u64) -> Arc<ResilienceRegistry> {
    registry_with_limits(failure_threshold, open_secs, HashMap::new())
}

pub fn registry_with_limits(
    failure_threshold: u32,
    open_secs: u64,
    limits: HashMap<String, RateLimit>,
) -> Arc<ResilienceRegistry> {
    Arc::new(ResilienceRegistry::new(
        BreakerConfig {
            failure_threshold,
            open_duration: Duration::from_secs(open_secs),
            ..BreakerConfig::default()
        },
        HashMap::new(),
        RateLimiter::new(limits, None),
    ))
}

pub fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("vigil_it_{}", uuid::Uuid::new_v4()))
}

pub fn bars(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .map(|&close| Bar {
            time: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 10_000.0,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Fixed close series per symbol. Can be told to fail every call.
pub struct FixedHistory {
    name: String,
    series: HashMap<String, Vec<f64>>,
    failing: Mutex<bool>,
    calls: AtomicU32,
}

impl FixedHistory {
    pub fn new(name: &str, series: &[(&str, &[f64])]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            series: series
                .iter()
                .map(|(s, closes)| (s.to_string(), closes.to_vec()))
                .collect(),
            failing: Mutex::new(false),
            calls: AtomicU32::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoryProvider for FixedHistory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_history(
        &self,
        symbol: &str,
        _period: HistoryPeriod,
    ) -> Result<Vec<Bar>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock().unwrap() {
            return Err(ServiceError::transient(format!("{}: HTTP 503", self.name)));
        }
        Ok(self.series.get(symbol).map(|c| bars(c)).unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Paper broker that can be switched into a transient outage.
pub struct FlakyBroker {
    inner: PaperBroker,
    outage: Mutex<Option<String>>,
    calls: AtomicU32,
}

impl FlakyBroker {
    pub fn new(cash: Decimal) -> Arc<Self> {
        Arc::new(Self {
            inner: PaperBroker::new(cash),
            outage: Mutex::new(None),
            calls: AtomicU32::new(0),
        })
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.inner.set_price(symbol, price);
    }

    /// Fail every subsequent call with a transient error.
    pub fn set_outage(&self, msg: &str) {
        *self.outage.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_outage(&self) {
        *self.outage.lock().unwrap() = None;
    }

    /// Calls that reached the broker (short-circuited calls do not).
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outage.lock().unwrap().as_ref() {
            Some(msg) => Err(ServiceError::transient(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BrokerApi for FlakyBroker {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, ServiceError> {
        self.check()?;
        self.inner.get_quote(symbol).await
    }

    async fn get_balance(&self) -> Result<Decimal, ServiceError> {
        self.check()?;
        self.inner.get_balance().await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderReceipt, ServiceError> {
        self.check()?;
        self.inner.place_order(order).await
    }

    async fn get_positions(&self) -> Result<Vec<Position>, ServiceError> {
        self.check()?;
        self.inner.get_positions().await
    }
}
