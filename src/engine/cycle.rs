//! Autonomous decision cycle.
//!
//! A time-boxed state machine over [`CyclePhase`]:
//!
//! ```text
//! IDLE ─start─▶ SCANNING ▶ ANALYZING ▶ DECIDING ▶ EXECUTING
//!                  ▲                                  │
//!                  └── OPTIMIZING ◀ LEARNING ◀ MONITORING
//! ```
//!
//! Each call to [`AutonomousCycle::run_cycle_step`] first checks whether the
//! current phase has used up its configured duration and, if so, moves to
//! the next one. It then runs the current phase's logic once. Wrapping from
//! OPTIMIZING back to SCANNING completes a cycle: a snapshot is written,
//! per-cycle lists are cleared and the cycle count is incremented.
//!
//! A phase that fails is logged and counted; the loop carries on at the
//! next tick. A slow collaborator call can overrun a phase, since the
//! transition check only runs between ticks.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{
    make_trade_decision, Analyzer, Optimizer, PortfolioProvider, PositionMonitor, RiskManager,
    Scanner, TradeExecutor,
};
use crate::config::CycleConfig;
use crate::resilience::ResilienceRegistry;
use crate::storage::{self, CycleSnapshot};
use crate::types::{
    CyclePhase, CycleStats, DecisionReason, ExecutedTrade, ExecutionOutcome, LearningRecord,
    LearningTag, MonitoredPosition, Opportunity, Signal, TradeDecision,
};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// External collaborators. Any of them may be absent; the matching phase
/// then does nothing (or, for risk and portfolio, assumes a pass / no
/// positions).
#[derive(Clone, Default)]
pub struct Collaborators {
    pub scanner: Option<Arc<dyn Scanner>>,
    pub analyzer: Option<Arc<dyn Analyzer>>,
    pub risk: Option<Arc<dyn RiskManager>>,
    pub executor: Option<Arc<dyn TradeExecutor>>,
    pub portfolio: Option<Arc<dyn PortfolioProvider>>,
    pub monitor: Option<Arc<dyn PositionMonitor>>,
    pub optimizer: Option<Arc<dyn Optimizer>>,
}

/// Point-in-time view of the cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleStatus {
    pub current_phase: CyclePhase,
    pub cycle_count: u64,
    pub phase_started_at: Option<DateTime<Utc>>,
    pub last_cycle_completed: Option<DateTime<Utc>>,
    pub stats: CycleStats,
    pub opportunities_found: usize,
    pub pending_decisions: usize,
    pub trades_executed: usize,
    pub learnings: usize,
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

pub struct AutonomousCycle {
    config: CycleConfig,
    collaborators: Collaborators,
    registry: Option<Arc<ResilienceRegistry>>,
    snapshot_dir: Option<PathBuf>,

    phase: CyclePhase,
    phase_started: Option<Instant>,
    phase_started_at: Option<DateTime<Utc>>,
    /// Set once the current visit's one-shot work is done.
    phase_work_done: bool,
    cycle_count: u64,
    stats: CycleStats,
    last_cycle_completed: Option<DateTime<Utc>>,

    // Per-cycle state, cleared on wraparound.
    opportunities: Vec<Opportunity>,
    decisions: Vec<TradeDecision>,
    pending: Vec<TradeDecision>,
    trades: Vec<ExecutedTrade>,
    learned: usize,
    monitored: Vec<MonitoredPosition>,
    /// Symbols recorded during the current MONITORING visit.
    monitored_this_visit: HashSet<String>,

    // Carried across cycles, bounded by `max_learnings`.
    learnings: VecDeque<LearningRecord>,
    trade_history: VecDeque<ExecutedTrade>,
    trades_since_optimization: u64,
}

impl AutonomousCycle {
    pub fn new(config: CycleConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            registry: None,
            snapshot_dir: None,
            phase: CyclePhase::Idle,
            phase_started: None,
            phase_started_at: None,
            phase_work_done: false,
            cycle_count: 0,
            stats: CycleStats::default(),
            last_cycle_completed: None,
            opportunities: Vec::new(),
            decisions: Vec::new(),
            pending: Vec::new(),
            trades: Vec::new(),
            learned: 0,
            monitored: Vec::new(),
            monitored_this_visit: HashSet::new(),
            learnings: VecDeque::new(),
            trade_history: VecDeque::new(),
            trades_since_optimization: 0,
        }
    }

    /// Include breaker statistics from `registry` in snapshots.
    pub fn with_registry(mut self, registry: Arc<ResilienceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Write snapshots to `dir`. Without this nothing is persisted.
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    /// Resume cumulative statistics from a saved snapshot.
    pub fn restore(&mut self, snapshot: &CycleSnapshot) {
        self.stats = snapshot.stats.clone();
        info!(stats = %self.stats, "Cumulative statistics restored");
    }

    // -- Accessors -------------------------------------------------------

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn opportunities(&self) -> &[Opportunity] {
        &self.opportunities
    }

    /// Every decision made this cycle, accepted or not.
    pub fn decisions(&self) -> &[TradeDecision] {
        &self.decisions
    }

    /// Accepted decisions not yet executed.
    pub fn pending_decisions(&self) -> &[TradeDecision] {
        &self.pending
    }

    pub fn executed_trades(&self) -> &[ExecutedTrade] {
        &self.trades
    }

    pub fn monitored_positions(&self) -> &[MonitoredPosition] {
        &self.monitored
    }

    pub fn learnings(&self) -> &VecDeque<LearningRecord> {
        &self.learnings
    }

    pub fn status(&self) -> CycleStatus {
        CycleStatus {
            current_phase: self.phase,
            cycle_count: self.cycle_count,
            phase_started_at: self.phase_started_at,
            last_cycle_completed: self.last_cycle_completed,
            stats: self.stats.clone(),
            opportunities_found: self.opportunities.len(),
            pending_decisions: self.pending.len(),
            trades_executed: self.trades.len(),
            learnings: self.learnings.len(),
        }
    }

    // -- Lifecycle -------------------------------------------------------

    pub fn start_cycle(&mut self) {
        self.cycle_count += 1;
        self.stats.total_cycles += 1;
        self.enter(CyclePhase::Scanning);
        info!(cycle = self.cycle_count, "Autonomous cycle started");
    }

    /// Go IDLE and write a final snapshot.
    pub fn stop_cycle(&mut self) {
        info!(cycle = self.cycle_count, phase = %self.phase, "Stopping autonomous cycle");
        self.phase = CyclePhase::Idle;
        self.phase_started = None;
        self.phase_started_at = None;
        self.persist();
    }

    /// Whether the current phase has run for its full duration at `now`.
    pub fn should_transition(&self, now: Instant) -> bool {
        if self.phase == CyclePhase::Idle {
            return false;
        }
        match self.phase_started {
            Some(started) => {
                now.saturating_duration_since(started)
                    >= self.config.phase_durations.duration(self.phase)
            }
            None => true,
        }
    }

    /// One scheduler tick. Returns `false` while IDLE.
    pub async fn run_cycle_step(&mut self) -> bool {
        if self.phase == CyclePhase::Idle {
            return false;
        }
        if self.should_transition(Instant::now()) {
            self.transition();
        }

        let phase = self.phase;
        if let Err(e) = self.execute_phase().await {
            self.stats.phase_errors += 1;
            error!(
                cycle = self.cycle_count,
                phase = %phase,
                error = format!("{e:#}"),
                "Phase failed, continuing on next tick"
            );
        }
        true
    }

    /// Drive `run_cycle_step` every `tick` until `stop` becomes true.
    ///
    /// The stop signal is observed between ticks; a step in progress is
    /// never interrupted.
    pub async fn run(&mut self, tick: Duration, mut stop: watch::Receiver<bool>) {
        if self.phase == CyclePhase::Idle {
            self.start_cycle();
        }

        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = tick.as_millis() as u64, "Entering cycle loop");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if *stop.borrow() {
                        break;
                    }
                    if !self.run_cycle_step().await {
                        break;
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        self.stop_cycle();
    }

    fn enter(&mut self, phase: CyclePhase) {
        self.phase = phase;
        self.phase_started = Some(Instant::now());
        self.phase_started_at = Some(Utc::now());
        self.phase_work_done = false;
        self.monitored_this_visit.clear();
        info!(cycle = self.cycle_count, phase = %phase, "Phase transition");
    }

    fn transition(&mut self) {
        if self.phase == CyclePhase::Optimizing {
            self.complete_cycle();
        }
        self.enter(self.phase.next());
    }

    fn complete_cycle(&mut self) {
        self.last_cycle_completed = Some(Utc::now());
        info!(
            cycle = self.cycle_count,
            opportunities = self.opportunities.len(),
            decisions = self.decisions.len(),
            trades = self.trades.len(),
            stats = %self.stats,
            "Cycle complete"
        );
        self.persist();

        self.opportunities.clear();
        self.decisions.clear();
        self.pending.clear();
        self.trades.clear();
        self.learned = 0;
        self.monitored.clear();

        self.cycle_count += 1;
        self.stats.total_cycles += 1;
    }

    fn snapshot(&self) -> CycleSnapshot {
        CycleSnapshot {
            cycle_count: self.cycle_count,
            timestamp: Utc::now(),
            stats: self.stats.clone(),
            current_phase: self.phase,
            opportunities_found: self.opportunities.len(),
            trades_executed: self.trades.len(),
            breakers: self
                .registry
                .as_ref()
                .map(|r| r.breaker_stats())
                .unwrap_or_default(),
        }
    }

    fn persist(&self) {
        let Some(dir) = &self.snapshot_dir else {
            return;
        };
        if let Err(e) = storage::save_snapshot(dir, &self.snapshot()) {
            error!(error = format!("{e:#}"), "Failed to save cycle snapshot");
        }
    }

    // -- Phases ----------------------------------------------------------

    async fn execute_phase(&mut self) -> Result<()> {
        match self.phase {
            CyclePhase::Scanning => self.phase_scanning().await,
            CyclePhase::Analyzing => self.phase_analyzing().await,
            CyclePhase::Deciding => self.phase_deciding().await,
            CyclePhase::Executing => self.phase_executing().await,
            CyclePhase::Monitoring => self.phase_monitoring().await,
            CyclePhase::Learning => {
                self.phase_learning();
                Ok(())
            }
            CyclePhase::Optimizing => self.phase_optimizing().await,
            CyclePhase::Idle => Ok(()),
        }
    }

    async fn phase_scanning(&mut self) -> Result<()> {
        if self.phase_work_done {
            return Ok(());
        }
        let Some(scanner) = self.collaborators.scanner.clone() else {
            warn!("No scanner configured, nothing to scan");
            self.phase_work_done = true;
            return Ok(());
        };

        let mut found = scanner
            .scan(&self.config.scan_categories, self.config.max_symbols_scanned, true)
            .await
            .context("market scan failed")?;
        found.truncate(self.config.top_opportunities);

        self.stats.opportunities_found += found.len() as u64;
        info!(cycle = self.cycle_count, count = found.len(), "Opportunities found");
        self.opportunities = found;
        self.phase_work_done = true;
        Ok(())
    }

    async fn phase_analyzing(&mut self) -> Result<()> {
        let Some(analyzer) = self.collaborators.analyzer.clone() else {
            return Ok(());
        };
        if self.opportunities.iter().all(Opportunity::is_analyzed) {
            return Ok(());
        }

        let mut failed: HashSet<String> = HashSet::new();
        let mut analyzed = 0usize;
        for opp in self.opportunities.iter_mut().filter(|o| !o.is_analyzed()) {
            match analyzer.analyze(&opp.symbol).await {
                Ok(analysis) => {
                    opp.analysis_score = Some(analysis.score);
                    if let Some(signal) = analysis.signal {
                        opp.signal = signal;
                    }
                    analyzed += 1;
                    debug!(symbol = %opp.symbol, score = analysis.score, summary = %analysis.summary, "Analyzed");
                }
                Err(e) => {
                    debug!(symbol = %opp.symbol, error = %e, "Analysis failed, dropping");
                    failed.insert(opp.symbol.clone());
                }
            }
        }

        self.opportunities.retain(|o| !failed.contains(&o.symbol));
        self.opportunities
            .sort_by(|a, b| b.final_score().total_cmp(&a.final_score()));
        info!(
            analyzed,
            dropped = failed.len(),
            remaining = self.opportunities.len(),
            "Opportunities analyzed"
        );
        Ok(())
    }

    async fn phase_deciding(&mut self) -> Result<()> {
        if self.phase_work_done {
            return Ok(());
        }
        self.phase_work_done = true;

        let min_score = self.config.min_score_to_trade;
        let viable: Vec<Opportunity> = self
            .opportunities
            .iter()
            .filter(|o| o.final_score() >= min_score)
            .take(self.config.max_opportunities_per_cycle)
            .cloned()
            .collect();
        if viable.is_empty() {
            info!(cycle = self.cycle_count, "No opportunity reached the minimum score");
            return Ok(());
        }

        let held = self.held_symbols().await;
        let mut decisions = Vec::with_capacity(viable.len());
        for opp in &viable {
            let decision = match &held {
                Some(held) => {
                    let has_position = held.contains(&opp.symbol);
                    let risk_ok = if has_position {
                        true
                    } else {
                        self.check_risk(&opp.symbol, opp.signal).await
                    };
                    make_trade_decision(opp, min_score, has_position, risk_ok)
                }
                None => TradeDecision {
                    symbol: opp.symbol.clone(),
                    signal: opp.signal,
                    score: opp.final_score(),
                    should_trade: false,
                    reason: DecisionReason::PositionsUnavailable,
                },
            };
            info!(decision = %decision, "Trade decision");
            decisions.push(decision);
        }

        self.stats.decisions_made += decisions.len() as u64;
        self.pending = decisions.iter().filter(|d| d.should_trade).cloned().collect();
        info!(
            cycle = self.cycle_count,
            decided = decisions.len(),
            accepted = self.pending.len(),
            "Decisions made"
        );
        self.decisions.extend(decisions);
        Ok(())
    }

    /// Symbols with an open position, or `None` if they could not be fetched.
    async fn held_symbols(&self) -> Option<HashSet<String>> {
        let Some(portfolio) = &self.collaborators.portfolio else {
            return Some(HashSet::new());
        };
        match portfolio.get_open_positions().await {
            Ok(positions) => Some(positions.into_iter().map(|p| p.symbol).collect()),
            Err(e) => {
                warn!(error = format!("{e:#}"), "Could not fetch open positions, rejecting all decisions");
                None
            }
        }
    }

    async fn check_risk(&self, symbol: &str, signal: Signal) -> bool {
        let Some(risk) = &self.collaborators.risk else {
            return true;
        };
        match risk.check_risk(symbol, signal).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(symbol, error = format!("{e:#}"), "Risk check errored, treating as failed");
                false
            }
        }
    }

    async fn phase_executing(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let Some(executor) = self.collaborators.executor.clone() else {
            warn!(dropped = pending.len(), "No trade executor configured");
            return Ok(());
        };

        let mut executed = 0usize;
        for decision in pending {
            match executor.execute_trade(&decision.symbol, decision.signal).await {
                Ok(ExecutionOutcome::Accepted { order_id }) => {
                    info!(symbol = %decision.symbol, signal = %decision.signal, order_id = %order_id, "Trade executed");
                    let trade = ExecutedTrade {
                        symbol: decision.symbol,
                        signal: decision.signal,
                        order_id,
                        executed_at: Utc::now(),
                    };
                    self.trades.push(trade.clone());
                    self.trade_history.push_back(trade);
                    while self.trade_history.len() > self.config.max_learnings {
                        self.trade_history.pop_front();
                    }
                    self.stats.trades_executed += 1;
                    self.stats.successful_trades += 1;
                    self.trades_since_optimization += 1;
                    executed += 1;
                }
                Ok(ExecutionOutcome::Rejected { error }) => {
                    self.stats.failed_trades += 1;
                    warn!(symbol = %decision.symbol, error = %error, "Trade rejected");
                }
                Err(e) => {
                    self.stats.failed_trades += 1;
                    error!(symbol = %decision.symbol, error = format!("{e:#}"), "Trade execution failed");
                }
            }
        }
        info!(cycle = self.cycle_count, executed, "Execution pass complete");
        Ok(())
    }

    async fn phase_monitoring(&mut self) -> Result<()> {
        let Some(portfolio) = self.collaborators.portfolio.clone() else {
            return Ok(());
        };
        let positions = portfolio
            .get_open_positions()
            .await
            .context("failed to fetch open positions")?;

        let monitor = self.collaborators.monitor.clone();
        let mut checked = 0usize;
        for position in &positions {
            if let Some(monitor) = &monitor {
                if let Err(e) = monitor.check_position(position).await {
                    debug!(symbol = %position.symbol, error = %e, "Position check failed");
                    continue;
                }
            }
            checked += 1;
            // Checked every tick, recorded once per visit.
            if self.monitored_this_visit.insert(position.symbol.clone()) {
                self.monitored.push(MonitoredPosition {
                    symbol: position.symbol.clone(),
                    checked_at: Utc::now(),
                });
                self.stats.positions_monitored += 1;
            }
        }
        debug!(open = positions.len(), checked, "Positions monitored");
        Ok(())
    }

    fn phase_learning(&mut self) {
        let unlearned = &self.trades[self.learned.min(self.trades.len())..];
        if unlearned.is_empty() {
            return;
        }
        let skip = unlearned.len().saturating_sub(self.config.learning_window);

        let records: Vec<LearningRecord> = unlearned[skip..]
            .iter()
            .map(|t| LearningRecord {
                symbol: t.symbol.clone(),
                timestamp: t.executed_at,
                tag: LearningTag::Execution,
                insight: format!("{} order {} executed", t.signal, t.order_id),
            })
            .collect();
        self.learned = self.trades.len();

        self.stats.learnings_extracted += records.len() as u64;
        let extracted = records.len();
        self.learnings.extend(records);
        while self.learnings.len() > self.config.max_learnings {
            self.learnings.pop_front();
        }
        info!(extracted, held = self.learnings.len(), "Learnings extracted");
    }

    async fn phase_optimizing(&mut self) -> Result<()> {
        if self.trades_since_optimization < self.config.min_trades_to_optimize {
            debug!(
                trades = self.trades_since_optimization,
                needed = self.config.min_trades_to_optimize,
                "Not enough trades to optimize"
            );
            return Ok(());
        }
        let Some(optimizer) = self.collaborators.optimizer.clone() else {
            return Ok(());
        };

        let trades: Vec<ExecutedTrade> = self.trade_history.iter().cloned().collect();
        let learnings: Vec<LearningRecord> = self.learnings.iter().cloned().collect();
        info!(trades = trades.len(), learnings = learnings.len(), "Optimizing strategy");
        optimizer
            .optimize(&trades, &learnings)
            .await
            .context("optimizer failed")?;

        self.trades_since_optimization = 0;
        self.stats.optimizations_run += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhaseDurations;
    use crate::engine::{
        MockAnalyzer, MockOptimizer, MockPortfolioProvider, MockPositionMonitor, MockRiskManager,
        MockScanner, MockTradeExecutor,
    };
    use crate::types::{Analysis, Position};
    use anyhow::anyhow;
    use rust_decimal_macros::dec;

    const PHASE_SECS: u64 = 10;

    fn config() -> CycleConfig {
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
            top_opportunities: 3,
            max_opportunities_per_cycle: 2,
            min_trades_to_optimize: 2,
            max_learnings: 3,
            ..CycleConfig::default()
        }
    }

    fn scanner_returning(opps: Vec<Opportunity>) -> MockScanner {
        let mut scanner = MockScanner::new();
        scanner
            .expect_scan()
            .returning(move |_, _, _| Ok(opps.clone()));
        scanner
    }

    fn accepting_executor() -> MockTradeExecutor {
        let mut executor = MockTradeExecutor::new();
        executor.expect_execute_trade().returning(|symbol, _| {
            Ok(ExecutionOutcome::Accepted {
                order_id: format!("ord-{symbol}"),
            })
        });
        executor
    }

    fn position(symbol: &str) -> Position {
        Position {
            symbol: symbol.into(),
            quantity: dec!(10),
            avg_price: dec!(100),
        }
    }

    /// Advance past the current phase and tick until `target` is current.
    async fn advance_to(cycle: &mut AutonomousCycle, target: CyclePhase) {
        while cycle.phase() != target {
            tokio::time::advance(Duration::from_secs(PHASE_SECS)).await;
            cycle.run_cycle_step().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_moves_to_scanning() {
        let mut cycle = AutonomousCycle::new(config(), Collaborators::default());
        assert_eq!(cycle.phase(), CyclePhase::Idle);
        assert_eq!(cycle.cycle_count(), 0);

        cycle.start_cycle();
        assert_eq!(cycle.phase(), CyclePhase::Scanning);
        assert_eq!(cycle.cycle_count(), 1);
        assert_eq!(cycle.stats().total_cycles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_step_does_nothing() {
        let mut scanner = MockScanner::new();
        scanner.expect_scan().never();
        let mut cycle = AutonomousCycle::new(
            config(),
            Collaborators {
                scanner: Some(Arc::new(scanner)),
                ..Collaborators::default()
            },
        );
        assert!(!cycle.run_cycle_step().await);
        assert_eq!(cycle.phase(), CyclePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle_wraps_and_counts() {
        let mut cycle = AutonomousCycle::new(config(), Collaborators::default());
        cycle.start_cycle();
        assert!(cycle.run_cycle_step().await);

        let mut seen = vec![cycle.phase()];
        for _ in 0..CyclePhase::ORDER.len() {
            tokio::time::advance(Duration::from_secs(PHASE_SECS)).await;
            cycle.run_cycle_step().await;
            seen.push(cycle.phase());
        }

        let mut expected = CyclePhase::ORDER.to_vec();
        expected.push(CyclePhase::Scanning);
        assert_eq!(seen, expected);
        assert_eq!(cycle.cycle_count(), 2);
        assert_eq!(cycle.stats().total_cycles, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_transition_predicate() {
        let mut cycle = AutonomousCycle::new(config(), Collaborators::default());
        assert!(!cycle.should_transition(Instant::now()));

        cycle.start_cycle();
        let now = Instant::now();
        assert!(!cycle.should_transition(now));
        assert!(!cycle.should_transition(now + Duration::from_secs(PHASE_SECS - 1)));
        assert!(cycle.should_transition(now + Duration::from_secs(PHASE_SECS)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_holds_before_duration() {
        let mut cycle = AutonomousCycle::new(config(), Collaborators::default());
        cycle.start_cycle();
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(1)).await;
            cycle.run_cycle_step().await;
        }
        assert_eq!(cycle.phase(), CyclePhase::Scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scanning_keeps_top_n_once_per_visit() {
        let mut scanner = MockScanner::new();
        scanner
            .expect_scan()
            .withf(|categories, max, use_cache| {
                categories.len() == 2 && categories[0] == "acciones" && *max == 200 && *use_cache
            })
            .times(1)
            .returning(|_, _, _| {
                Ok((0..5)
                    .map(|i| Opportunity::new(format!("SYM{i}"), 90.0 - i as f64, Signal::Buy))
                    .collect())
            });

        let mut cycle = AutonomousCycle::new(
            config(),
            Collaborators {
                scanner: Some(Arc::new(scanner)),
                ..Collaborators::default()
            },
        );
        cycle.start_cycle();
        cycle.run_cycle_step().await;
        cycle.run_cycle_step().await;

        assert_eq!(cycle.opportunities().len(), 3);
        assert_eq!(cycle.opportunities()[0].symbol, "SYM0");
        assert_eq!(cycle.stats().opportunities_found, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_failure_counted_and_loop_continues() {
        let mut scanner = MockScanner::new();
        scanner
            .expect_scan()
            .returning(|_, _, _| Err(anyhow!("scanner unavailable")));
        let mut cycle = AutonomousCycle::new(
            config(),
            Collaborators {
                scanner: Some(Arc::new(scanner)),
                ..Collaborators::default()
            },
        );
        cycle.start_cycle();

        assert!(cycle.run_cycle_step().await);
        assert!(cycle.run_cycle_step().await);
        assert_eq!(cycle.stats().phase_errors, 2);
        assert!(cycle.opportunities().is_empty());

        advance_to(&mut cycle, CyclePhase::Analyzing).await;
        assert_eq!(cycle.phase(), CyclePhase::Analyzing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analyzing_drops_failures_and_resorts() {
        let mut analyzer = MockAnalyzer::new();
        analyzer.expect_analyze().times(3).returning(|symbol| match symbol {
            "LOW" => Ok(Analysis {
                symbol: symbol.into(),
                score: 95.0,
                signal: None,
                summary: "strong momentum".into(),
            }),
            "HIGH" => Ok(Analysis {
                symbol: symbol.into(),
                score: 55.0,
                signal: Some(Signal::Sell),
                summary: "fading".into(),
            }),
            _ => Err(anyhow!("timeout")),
        });

        let mut cycle = AutonomousCycle::new(
            config(),
            Collaborators {
                scanner: Some(Arc::new(scanner_returning(vec![
                    Opportunity::new("HIGH", 80.0, Signal::Buy),
                    Opportunity::new("BROKEN", 70.0, Signal::Buy),
                    Opportunity::new("LOW", 60.0, Signal::Buy),
                ]))),
                analyzer: Some(Arc::new(analyzer)),
                ..Collaborators::default()
            },
        );
        cycle.start_cycle();
        cycle.run_cycle_step().await;
        advance_to(&mut cycle, CyclePhase::Analyzing).await;
        // Second tick has nothing left to analyze.
        cycle.run_cycle_step().await;

        let symbols: Vec<&str> = cycle.opportunities().iter().map(|o| o.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["LOW", "HIGH"]);
        assert_eq!(cycle.opportunities()[1].signal, Signal::Sell);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deciding_applies_position_and_risk() {
        let mut portfolio = MockPortfolioProvider::new();
        portfolio
            .expect_get_open_positions()
            .returning(|| Ok(vec![position("HELD")]));
        let mut risk = MockRiskManager::new();
        risk.expect_check_risk()
            .returning(|symbol, _| Ok(symbol != "RISKY"));

        let mut cfg = config();
        cfg.max_opportunities_per_cycle = 5;
        let mut cycle = AutonomousCycle::new(
            cfg,
            Collaborators {
                scanner: Some(Arc::new(scanner_returning(vec![
                    Opportunity::new("GOOD", 70.0, Signal::Buy),
                    Opportunity::new("HELD", 65.0, Signal::Buy),
                    Opportunity::new("RISKY", 60.0, Signal::Buy),
                    Opportunity::new("WEAK", 40.0, Signal::Buy),
                ]))),
                risk: Some(Arc::new(risk)),
                portfolio: Some(Arc::new(portfolio)),
                ..Collaborators::default()
            },
        );
        cycle.start_cycle();
        cycle.run_cycle_step().await;
        advance_to(&mut cycle, CyclePhase::Deciding).await;
        cycle.run_cycle_step().await;

        let reasons: Vec<(&str, DecisionReason)> = cycle
            .decisions()
            .iter()
            .map(|d| (d.symbol.as_str(), d.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("GOOD", DecisionReason::Accepted),
                ("HELD", DecisionReason::ExistingPosition),
                ("RISKY", DecisionReason::RiskCheckFailed),
            ]
        );
        assert_eq!(cycle.pending_decisions().len(), 1);
        assert_eq!(cycle.stats().decisions_made, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deciding_rejects_when_positions_unavailable() {
        let mut portfolio = MockPortfolioProvider::new();
        portfolio
            .expect_get_open_positions()
            .returning(|| Err(anyhow!("broker breaker open")));

        let mut cycle = AutonomousCycle::new(
            config(),
            Collaborators {
                scanner: Some(Arc::new(scanner_returning(vec![Opportunity::new(
                    "GGAL",
                    80.0,
                    Signal::Buy,
                )]))),
                portfolio: Some(Arc::new(portfolio)),
                ..Collaborators::default()
            },
        );
        cycle.start_cycle();
        cycle.run_cycle_step().await;
        advance_to(&mut cycle, CyclePhase::Deciding).await;

        assert_eq!(cycle.decisions().len(), 1);
        assert_eq!(cycle.decisions()[0].reason, DecisionReason::PositionsUnavailable);
        assert!(cycle.pending_decisions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_executing_tolerates_failures_and_drains() {
        let mut executor = MockTradeExecutor::new();
        executor
            .expect_execute_trade()
            .times(2)
            .returning(|symbol, _| {
                if symbol == "AAA" {
                    Err(anyhow!("connection reset"))
                } else {
                    Ok(ExecutionOutcome::Accepted {
                        order_id: "ord-1".into(),
                    })
                }
            });

        let mut cycle = AutonomousCycle::new(
            config(),
            Collaborators {
                scanner: Some(Arc::new(scanner_returning(vec![
                    Opportunity::new("AAA", 90.0, Signal::Buy),
                    Opportunity::new("BBB", 80.0, Signal::Buy),
                ]))),
                executor: Some(Arc::new(executor)),
                ..Collaborators::default()
            },
        );
        cycle.start_cycle();
        cycle.run_cycle_step().await;
        advance_to(&mut cycle, CyclePhase::Executing).await;
        // Pending list was drained; no second execution.
        cycle.run_cycle_step().await;

        assert_eq!(cycle.executed_trades().len(), 1);
        assert_eq!(cycle.executed_trades()[0].symbol, "BBB");
        assert_eq!(cycle.stats().trades_executed, 1);
        assert_eq!(cycle.stats().failed_trades, 1);
        assert!(cycle.pending_decisions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_tolerates_position_failures() {
        let mut portfolio = MockPortfolioProvider::new();
        portfolio
            .expect_get_open_positions()
            .returning(|| Ok(vec![position("AAA"), position("BBB"), position("CCC")]));
        let mut monitor = MockPositionMonitor::new();
        monitor.expect_check_position().returning(|p| {
            if p.symbol == "BBB" {
                Err(anyhow!("quote unavailable"))
            } else {
                Ok(())
            }
        });

        let mut cycle = AutonomousCycle::new(
            config(),
            Collaborators {
                portfolio: Some(Arc::new(portfolio)),
                monitor: Some(Arc::new(monitor)),
                ..Collaborators::default()
            },
        );
        cycle.start_cycle();
        advance_to(&mut cycle, CyclePhase::Monitoring).await;

        let symbols: Vec<&str> = cycle
            .monitored_positions()
            .iter()
            .map(|m| m.symbol.as_str())
            .collect();
        assert_eq!(symbols, vec!["AAA", "CCC"]);
        assert_eq!(cycle.stats().positions_monitored, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_counts_each_position_once_per_visit() {
        let mut portfolio = MockPortfolioProvider::new();
        portfolio
            .expect_get_open_positions()
            .returning(|| Ok(vec![position("AAA"), position("BBB")]));
        let mut monitor = MockPositionMonitor::new();
        monitor.expect_check_position().times(20).returning(|_| Ok(()));

        let mut cycle = AutonomousCycle::new(
            config(),
            Collaborators {
                portfolio: Some(Arc::new(portfolio)),
                monitor: Some(Arc::new(monitor)),
                ..Collaborators::default()
            },
        );
        cycle.start_cycle();
        advance_to(&mut cycle, CyclePhase::Monitoring).await;
        for _ in 0..9 {
            tokio::time::advance(Duration::from_secs(1)).await;
            cycle.run_cycle_step().await;
        }
        assert_eq!(cycle.phase(), CyclePhase::Monitoring);

        assert_eq!(cycle.stats().positions_monitored, 2);
        assert_eq!(cycle.monitored_positions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_learning_once_per_trade_and_bounded() {
        let mut cfg = config();
        cfg.max_opportunities_per_cycle = 5;
        cfg.top_opportunities = 5;
        let mut cycle = AutonomousCycle::new(
            cfg,
            Collaborators {
                scanner: Some(Arc::new(scanner_returning(
                    (0..4)
                        .map(|i| Opportunity::new(format!("S{i}"), 80.0, Signal::Buy))
                        .collect(),
                ))),
                executor: Some(Arc::new(accepting_executor())),
                ..Collaborators::default()
            },
        );
        cycle.start_cycle();
        cycle.run_cycle_step().await;
        advance_to(&mut cycle, CyclePhase::Learning).await;
        cycle.run_cycle_step().await;

        assert_eq!(cycle.stats().learnings_extracted, 4);
        assert_eq!(cycle.learnings().len(), 3);
        assert_eq!(cycle.learnings()[0].symbol, "S1");
        assert_eq!(cycle.learnings()[0].tag, LearningTag::Execution);
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimizing_waits_for_enough_trades() {
        let mut optimizer = MockOptimizer::new();
        optimizer
            .expect_optimize()
            .times(1)
            .returning(|trades, _| {
                assert_eq!(trades.len(), 2);
                Ok(())
            });

        let mut cycle = AutonomousCycle::new(
            config(),
            Collaborators {
                scanner: Some(Arc::new(scanner_returning(vec![
                    Opportunity::new("AAA", 90.0, Signal::Buy),
                    Opportunity::new("BBB", 80.0, Signal::Buy),
                ]))),
                executor: Some(Arc::new(accepting_executor())),
                optimizer: Some(Arc::new(optimizer)),
                ..Collaborators::default()
            },
        );
        cycle.start_cycle();
        cycle.run_cycle_step().await;
        advance_to(&mut cycle, CyclePhase::Optimizing).await;
        // Counter was reset; further ticks do not re-optimize.
        cycle.run_cycle_step().await;

        assert_eq!(cycle.stats().optimizations_run, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wraparound_clears_cycle_state() {
        let mut cycle = AutonomousCycle::new(
            config(),
            Collaborators {
                scanner: Some(Arc::new(scanner_returning(vec![Opportunity::new(
                    "AAA",
                    90.0,
                    Signal::Buy,
                )]))),
                executor: Some(Arc::new(accepting_executor())),
                ..Collaborators::default()
            },
        );
        cycle.start_cycle();
        cycle.run_cycle_step().await;
        advance_to(&mut cycle, CyclePhase::Optimizing).await;
        assert_eq!(cycle.executed_trades().len(), 1);

        advance_to(&mut cycle, CyclePhase::Scanning).await;
        assert!(cycle.executed_trades().is_empty());
        assert!(cycle.decisions().is_empty());
        // Rescanned on the wraparound tick.
        assert_eq!(cycle.opportunities().len(), 1);
        assert_eq!(cycle.stats().trades_executed, 1);
        assert_eq!(cycle.learnings().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_goes_idle() {
        let mut cycle = AutonomousCycle::new(config(), Collaborators::default());
        cycle.start_cycle();
        cycle.stop_cycle();
        assert_eq!(cycle.phase(), CyclePhase::Idle);
        assert!(cycle.status().phase_started_at.is_none());
        assert!(!cycle.run_cycle_step().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_signal() {
        let (tx, rx) = watch::channel(false);
        let mut cycle = AutonomousCycle::new(config(), Collaborators::default());

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            let _ = tx.send(true);
        });
        cycle.run(Duration::from_secs(1), rx).await;
        stopper.await.unwrap();

        assert_eq!(cycle.phase(), CyclePhase::Idle);
        assert_eq!(cycle.cycle_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_continues_while_stop_sender_is_held() {
        let (tx, rx) = watch::channel(false);
        let mut cycle = AutonomousCycle::new(config(), Collaborators::default());

        let outcome =
            tokio::time::timeout(Duration::from_secs(75), cycle.run(Duration::from_secs(1), rx)).await;
        assert!(outcome.is_err());
        assert_eq!(cycle.phase(), CyclePhase::Scanning);
        assert_eq!(cycle.cycle_count(), 2);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_counts() {
        let mut cycle = AutonomousCycle::new(
            config(),
            Collaborators {
                scanner: Some(Arc::new(scanner_returning(vec![
                    Opportunity::new("AAA", 90.0, Signal::Buy),
                    Opportunity::new("BBB", 80.0, Signal::Buy),
                ]))),
                ..Collaborators::default()
            },
        );
        cycle.start_cycle();
        cycle.run_cycle_step().await;

        let status = cycle.status();
        assert_eq!(status.current_phase, CyclePhase::Scanning);
        assert_eq!(status.cycle_count, 1);
        assert_eq!(status.opportunities_found, 2);
        assert!(status.phase_started_at.is_some());
    }
}
