//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section has defaults, so a partial file still yields a runnable
//! configuration. Secrets (API keys) are referenced by env-var name in the
//! config and resolved at runtime.

use anyhow::{Context, Result};
use secrecy::Secret;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::resilience::{
    BreakerConfig, FailureKind, RateLimit, RateLimiter, ResilienceRegistry, RetryPolicy,
};
use crate::types::CyclePhase;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub cycle: CycleConfig,
    pub breaker_defaults: BreakerSection,
    pub breakers: HashMap<String, BreakerSection>,
    pub rate_limits: HashMap<String, RateLimitSection>,
    pub retry: RetrySection,
    pub cache: CacheConfig,
    pub data_sources: DataSourcesConfig,
    pub paper: PaperConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub tick_interval_secs: u64,
    pub snapshot_dir: String,
    pub watchlist: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "VIGIL-001".into(),
            tick_interval_secs: 1,
            snapshot_dir: "data/autonomous_cycle".into(),
            watchlist: vec!["GGAL.BA".into(), "YPFD.BA".into(), "PAMP.BA".into(), "AAPL".into()],
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

/// Seconds spent in each phase before moving on.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PhaseDurations {
    pub scanning: u64,
    pub analyzing: u64,
    pub deciding: u64,
    pub executing: u64,
    pub monitoring: u64,
    pub learning: u64,
    pub optimizing: u64,
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            scanning: 5 * 60,
            analyzing: 10 * 60,
            deciding: 2 * 60,
            executing: 5 * 60,
            monitoring: 15 * 60,
            learning: 5 * 60,
            optimizing: 10 * 60,
        }
    }
}

impl PhaseDurations {
    /// Duration of a phase. IDLE has none.
    pub fn duration(&self, phase: CyclePhase) -> Duration {
        let secs = match phase {
            CyclePhase::Scanning => self.scanning,
            CyclePhase::Analyzing => self.analyzing,
            CyclePhase::Deciding => self.deciding,
            CyclePhase::Executing => self.executing,
            CyclePhase::Monitoring => self.monitoring,
            CyclePhase::Learning => self.learning,
            CyclePhase::Optimizing => self.optimizing,
            CyclePhase::Idle => 0,
        };
        Duration::from_secs(secs)
    }

    /// Length of one full SCANNING → OPTIMIZING pass.
    pub fn total(&self) -> Duration {
        CyclePhase::ORDER.iter().map(|p| self.duration(*p)).sum()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CycleConfig {
    pub phase_durations: PhaseDurations,
    pub min_score_to_trade: f64,
    pub max_opportunities_per_cycle: usize,
    pub max_symbols_scanned: usize,
    /// How many scan results are kept for analysis.
    pub top_opportunities: usize,
    pub scan_categories: Vec<String>,
    pub max_learnings: usize,
    /// Most recent trades considered per LEARNING pass.
    pub learning_window: usize,
    /// Executed trades needed since the last optimization before optimizing again.
    pub min_trades_to_optimize: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            phase_durations: PhaseDurations::default(),
            min_score_to_trade: 50.0,
            max_opportunities_per_cycle: 5,
            max_symbols_scanned: 200,
            top_opportunities: 20,
            scan_categories: vec!["acciones".into(), "cedears".into()],
            max_learnings: 100,
            learning_window: 10,
            min_trades_to_optimize: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Resilience
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_duration_secs: u64,
    /// Error kinds counted as breaker failures.
    pub failure_kinds: Vec<FailureKind>,
}

impl Default for BreakerSection {
    fn default() -> Self {
        let d = BreakerConfig::default();
        Self {
            failure_threshold: d.failure_threshold,
            success_threshold: d.success_threshold,
            open_duration_secs: d.open_duration.as_secs(),
            failure_kinds: d.failure_kinds,
        }
    }
}

impl From<&BreakerSection> for BreakerConfig {
    fn from(s: &BreakerSection) -> Self {
        BreakerConfig {
            failure_threshold: s.failure_threshold.max(1),
            success_threshold: s.success_threshold.max(1),
            open_duration: Duration::from_secs(s.open_duration_secs),
            failure_kinds: s.failure_kinds.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSection {
    pub max_calls: u32,
    pub window_secs: f64,
}

impl From<&RateLimitSection> for RateLimit {
    fn from(s: &RateLimitSection) -> Self {
        let window = if s.window_secs.is_finite() && s.window_secs > 0.0 {
            Duration::from_secs_f64(s.window_secs)
        } else {
            Duration::ZERO
        };
        RateLimit::new(s.max_calls, window)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub initial_delay_secs: f64,
    pub max_delay_secs: f64,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_secs: 1.0,
            max_delay_secs: 60.0,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(s: &RetrySection) -> Self {
        let secs = |v: f64| {
            if v.is_finite() && v > 0.0 {
                Duration::from_secs_f64(v)
            } else {
                Duration::ZERO
            }
        };
        RetryPolicy {
            max_retries: s.max_retries,
            initial_delay: secs(s.initial_delay_secs),
            max_delay: secs(s.max_delay_secs),
            exponential_base: s.exponential_base,
            jitter: s.jitter,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub quote_ttl_secs: u64,
    pub history_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            quote_ttl_secs: 30,
            history_ttl_secs: 15 * 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Data sources
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DataSourcesConfig {
    pub timeout_secs: u64,
    pub yahoo_enabled: bool,
    pub alpha_vantage_key_env: Option<String>,
    pub finnhub_key_env: Option<String>,
    pub twelve_data_key_env: Option<String>,
}

impl Default for DataSourcesConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            yahoo_enabled: true,
            alpha_vantage_key_env: Some("ALPHA_VANTAGE_API_KEY".into()),
            finnhub_key_env: Some("FINNHUB_API_KEY".into()),
            twelve_data_key_env: Some("TWELVE_DATA_API_KEY".into()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PaperConfig {
    pub starting_cash: f64,
    pub max_open_positions: usize,
    /// Largest single position as a fraction of cash.
    pub max_position_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            starting_cash: 1_000_000.0,
            max_open_positions: 10,
            max_position_pct: 0.10,
            stop_loss_pct: 0.05,
            take_profit_pct: 0.10,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve an optional key reference to a secret, if set and non-empty.
    pub fn resolve_secret(env_name: Option<&str>) -> Option<Secret<String>> {
        let value = std::env::var(env_name?).ok()?;
        if value.trim().is_empty() {
            None
        } else {
            Some(Secret::new(value))
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.agent.tick_interval_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    /// Build the process-wide breaker and rate-limiter registry.
    pub fn build_registry(&self) -> ResilienceRegistry {
        let breakers = self
            .breakers
            .iter()
            .map(|(name, section)| (name.clone(), BreakerConfig::from(section)))
            .collect();
        let limits = self
            .rate_limits
            .iter()
            .map(|(key, section)| (key.clone(), RateLimit::from(section)))
            .collect();

        ResilienceRegistry::new(
            BreakerConfig::from(&self.breaker_defaults),
            breakers,
            RateLimiter::new(limits, None),
        )
    }
}
