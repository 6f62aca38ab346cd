//! Core engine: the phase-driven decision cycle and the collaborators it
//! drives.
//!
//! The cycle only talks to the outside world through the traits below.
//! Built-in implementations live in [`scanner`], [`executor`] and
//! [`crate::strategy`]; tests substitute mocks.

pub mod cycle;
pub mod decision;
pub mod executor;
pub mod scanner;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{
    Analysis, ExecutedTrade, ExecutionOutcome, LearningRecord, Opportunity, Position, Signal,
};

pub use cycle::{AutonomousCycle, CycleStatus, Collaborators};
pub use decision::make_trade_decision;

/// Finds candidate symbols, scored 0–100, best first.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(
        &self,
        categories: &[String],
        max_symbols: usize,
        use_cache: bool,
    ) -> Result<Vec<Opportunity>>;
}

/// Scores one symbol in depth.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, symbol: &str) -> Result<Analysis>;
}

/// Final gate before a trade is accepted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RiskManager: Send + Sync {
    async fn check_risk(&self, symbol: &str, signal: Signal) -> Result<bool>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute_trade(&self, symbol: &str, signal: Signal) -> Result<ExecutionOutcome>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PortfolioProvider: Send + Sync {
    async fn get_open_positions(&self) -> Result<Vec<Position>>;
}

/// Per-position check run during MONITORING (stops, targets).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PositionMonitor: Send + Sync {
    async fn check_position(&self, position: &Position) -> Result<()>;
}

/// Strategy tuning, run during OPTIMIZING once enough trades accumulate.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Optimizer: Send + Sync {
    async fn optimize(&self, trades: &[ExecutedTrade], learnings: &[LearningRecord]) -> Result<()>;
}
