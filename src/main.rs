//! VIGIL — Resilient autonomous trading decision loop
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the resilience registry, data chain and paper broker, restores
//! cumulative statistics from disk, and runs the phase cycle until Ctrl+C.

use anyhow::{Context, Result};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use vigil::broker::{BrokerApi, BrokerSettings, PaperBroker, ResilientBroker};
use vigil::config::AppConfig;
use vigil::data::alpha_vantage::AlphaVantageProvider;
use vigil::data::finnhub::FinnhubProvider;
use vigil::data::twelve_data::TwelveDataProvider;
use vigil::data::yahoo::YahooProvider;
use vigil::data::{HistoryProvider, MultiSourceDataClient};
use vigil::engine::executor::BrokerExecutor;
use vigil::engine::scanner::{MomentumAnalyzer, WatchlistScanner};
use vigil::engine::{AutonomousCycle, Collaborators};
use vigil::resilience::ResilienceRegistry;
use vigil::storage;
use vigil::strategy::exits::{ExitBand, StopLossMonitor};
use vigil::strategy::risk::{LimitsRiskManager, RiskLimits};

const BANNER: &str = r#"
__     _____ ____ ___ _
\ \   / /_ _/ ___|_ _| |
 \ \ / / | | |  _ | || |
  \ V /  | | |_| || || |___
   \_/  |___\____|___|_____|

  Scan · Analyze · Decide · Execute · Monitor · Learn · Optimize
  v0.1.0 — Autonomous Cycle
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("VIGIL_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = AppConfig::load_or_default(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        config = %config_path,
        tick_secs = cfg.tick_interval().as_secs(),
        cycle_secs = cfg.cycle.phase_durations.total().as_secs(),
        "VIGIL starting up"
    );

    // -- Resilience and data ---------------------------------------------

    let registry = Arc::new(cfg.build_registry());
    let history = Arc::new(build_history_client(&cfg, Arc::clone(&registry))?);
    info!(sources = ?history.available_sources(), "History chain ready");

    // -- Broker ----------------------------------------------------------

    let starting_cash = Decimal::from_f64(cfg.paper.starting_cash)
        .context("paper.starting_cash is not a representable amount")?;
    let paper: Arc<dyn BrokerApi> =
        Arc::new(PaperBroker::new(starting_cash).with_history(Arc::clone(&history)));
    let broker = Arc::new(ResilientBroker::new(
        paper,
        Arc::clone(&registry),
        BrokerSettings {
            quote_ttl: Duration::from_secs(cfg.cache.quote_ttl_secs),
            retry: cfg.retry_policy(),
            timeout: Duration::from_secs(cfg.data_sources.timeout_secs),
        },
    ));
    info!(cash = %starting_cash, "Paper broker ready");

    // -- Collaborators ---------------------------------------------------

    let limits = RiskLimits::from_config(&cfg.paper);
    let executor = Arc::new(BrokerExecutor::new(Arc::clone(&broker), limits.max_position_pct));
    let collaborators = Collaborators {
        scanner: Some(Arc::new(WatchlistScanner::new(
            Arc::clone(&history),
            cfg.agent.watchlist.clone(),
        ))),
        analyzer: Some(Arc::new(MomentumAnalyzer::new(Arc::clone(&history)))),
        risk: Some(Arc::new(LimitsRiskManager::new(Arc::clone(&broker), limits))),
        executor: Some(executor.clone()),
        portfolio: Some(executor),
        monitor: Some(Arc::new(StopLossMonitor::new(
            Arc::clone(&broker),
            ExitBand::from_config(&cfg.paper),
        ))),
        optimizer: None,
    };

    // -- Restore and run -------------------------------------------------

    let snapshot_dir = PathBuf::from(&cfg.agent.snapshot_dir);
    let mut cycle = AutonomousCycle::new(cfg.cycle.clone(), collaborators)
        .with_registry(Arc::clone(&registry))
        .with_snapshot_dir(&snapshot_dir);
    if let Some(snapshot) = storage::load_latest_snapshot(&snapshot_dir)? {
        cycle.restore(&snapshot);
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received.");
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "Could not listen for Ctrl+C; run until killed");
                std::future::pending::<()>().await;
            }
        }
    });

    info!(tick_secs = cfg.tick_interval().as_secs(), "Entering main loop. Press Ctrl+C to stop.");
    cycle.run(cfg.tick_interval(), stop_rx).await;

    let status = cycle.status();
    info!(
        cycles = status.stats.total_cycles,
        trades = status.stats.trades_executed,
        phase_errors = status.stats.phase_errors,
        "VIGIL shut down cleanly."
    );
    Ok(())
}

/// Register providers in priority order. Keyed providers are skipped when
/// their key is not set.
fn build_history_client(
    cfg: &AppConfig,
    registry: Arc<ResilienceRegistry>,
) -> Result<MultiSourceDataClient> {
    let sources = &cfg.data_sources;
    let timeout = Duration::from_secs(sources.timeout_secs);
    let mut chain: Vec<Arc<dyn HistoryProvider>> = Vec::new();

    if sources.yahoo_enabled {
        chain.push(Arc::new(YahooProvider::new(timeout).context("Failed to build Yahoo client")?));
    }
    match AppConfig::resolve_secret(sources.alpha_vantage_key_env.as_deref()) {
        Some(key) => chain.push(Arc::new(
            AlphaVantageProvider::new(key, timeout).context("Failed to build Alpha Vantage client")?,
        )),
        None => info!("Alpha Vantage key not set, source disabled"),
    }
    match AppConfig::resolve_secret(sources.finnhub_key_env.as_deref()) {
        Some(key) => chain.push(Arc::new(
            FinnhubProvider::new(key, timeout).context("Failed to build Finnhub client")?,
        )),
        None => info!("Finnhub key not set, source disabled"),
    }
    match AppConfig::resolve_secret(sources.twelve_data_key_env.as_deref()) {
        Some(key) => chain.push(Arc::new(
            TwelveDataProvider::new(key, timeout).context("Failed to build Twelve Data client")?,
        )),
        None => info!("Twelve Data key not set, source disabled"),
    }
    if chain.is_empty() {
        warn!("No history sources configured; scans will find nothing");
    }

    Ok(MultiSourceDataClient::new(chain, registry, timeout)
        .with_cache(Duration::from_secs(cfg.cache.history_ttl_secs)))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vigil=info"));

    let json_logging = std::env::var("VIGIL_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
