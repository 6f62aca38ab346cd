//! Shared types for the VIGIL agent.
//!
//! These types form the data model used across all modules. Results of
//! external calls are explicit tagged types rather than loose maps, so a
//! missing field is a compile error instead of a silent default.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Signals and opportunities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
            Signal::Hold => write!(f, "HOLD"),
        }
    }
}

/// A symbol surfaced by the scanner, optionally refined by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    /// Scanner score (0–100).
    pub score: f64,
    pub signal: Signal,
    /// Score attached during ANALYZING; `None` until analyzed.
    #[serde(default)]
    pub analysis_score: Option<f64>,
}

impl Opportunity {
    pub fn new(symbol: impl Into<String>, score: f64, signal: Signal) -> Self {
        Self {
            symbol: symbol.into(),
            score,
            signal,
            analysis_score: None,
        }
    }

    /// Analyzer score if present, scanner score otherwise.
    pub fn final_score(&self) -> f64 {
        self.analysis_score.unwrap_or(self.score)
    }

    pub fn is_analyzed(&self) -> bool {
        self.analysis_score.is_some()
    }
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (score {:.1})", self.signal, self.symbol, self.final_score())
    }
}

/// Result of a per-symbol analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub symbol: String,
    pub score: f64,
    /// The analyzer may revise the scanner's signal.
    pub signal: Option<Signal>,
    pub summary: String,
}

// ---------------------------------------------------------------------------
// Decisions and execution
// ---------------------------------------------------------------------------

/// Why a decision was accepted or which condition rejected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Accepted,
    ScoreBelowThreshold,
    ExistingPosition,
    RiskCheckFailed,
    PositionsUnavailable,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DecisionReason::Accepted => "score sufficient, no open position, risk OK",
            DecisionReason::ScoreBelowThreshold => "score below minimum threshold",
            DecisionReason::ExistingPosition => "position already open for symbol",
            DecisionReason::RiskCheckFailed => "risk check failed",
            DecisionReason::PositionsUnavailable => "open positions could not be fetched",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub symbol: String,
    pub signal: Signal,
    pub score: f64,
    pub should_trade: bool,
    pub reason: DecisionReason,
}

impl fmt::Display for TradeDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.should_trade { "TRADE" } else { "SKIP" };
        write!(
            f,
            "{verdict} {} {} (score {:.1}): {}",
            self.signal, self.symbol, self.score, self.reason
        )
    }
}

/// What the trade executor reported back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Accepted { order_id: String },
    Rejected { error: String },
}

/// A trade that the executor accepted during EXECUTING.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedTrade {
    pub symbol: String,
    pub signal: Signal,
    pub order_id: String,
    pub executed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Positions, quotes, orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredPosition {
    pub symbol: String,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub fill_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// One daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// ---------------------------------------------------------------------------
// Learning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningTag {
    Execution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRecord {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub tag: LearningTag,
    pub insight: String,
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

/// Phases of the autonomous cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    Scanning,
    Analyzing,
    Deciding,
    Executing,
    Monitoring,
    Learning,
    Optimizing,
    Idle,
}

impl CyclePhase {
    /// Active phases in execution order.
    pub const ORDER: [CyclePhase; 7] = [
        CyclePhase::Scanning,
        CyclePhase::Analyzing,
        CyclePhase::Deciding,
        CyclePhase::Executing,
        CyclePhase::Monitoring,
        CyclePhase::Learning,
        CyclePhase::Optimizing,
    ];

    /// Successor in the fixed order; OPTIMIZING wraps to SCANNING.
    /// IDLE has no successor.
    pub fn next(self) -> CyclePhase {
        match self {
            CyclePhase::Scanning => CyclePhase::Analyzing,
            CyclePhase::Analyzing => CyclePhase::Deciding,
            CyclePhase::Deciding => CyclePhase::Executing,
            CyclePhase::Executing => CyclePhase::Monitoring,
            CyclePhase::Monitoring => CyclePhase::Learning,
            CyclePhase::Learning => CyclePhase::Optimizing,
            CyclePhase::Optimizing => CyclePhase::Scanning,
            CyclePhase::Idle => CyclePhase::Idle,
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Scanning => "scanning",
            CyclePhase::Analyzing => "analyzing",
            CyclePhase::Deciding => "deciding",
            CyclePhase::Executing => "executing",
            CyclePhase::Monitoring => "monitoring",
            CyclePhase::Learning => "learning",
            CyclePhase::Optimizing => "optimizing",
            CyclePhase::Idle => "idle",
        };
        f.write_str(name)
    }
}

/// Totals across every cycle since first start. Survives restarts via
/// the persisted snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleStats {
    pub total_cycles: u64,
    pub opportunities_found: u64,
    pub decisions_made: u64,
    pub trades_executed: u64,
    pub successful_trades: u64,
    pub failed_trades: u64,
    pub positions_monitored: u64,
    pub learnings_extracted: u64,
    pub optimizations_run: u64,
    pub phase_errors: u64,
}

impl fmt::Display for CycleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycles={} | opportunities={} | trades={} (ok {}/failed {}) | phase_errors={}",
            self.total_cycles,
            self.opportunities_found,
            self.trades_executed,
            self.successful_trades,
            self.failed_trades,
            self.phase_errors,
        )
    }
}
