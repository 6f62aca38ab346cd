//! Limits-based risk manager.
//!
//! A BUY passes when fewer than `max_open_positions` are open and one unit
//! of the symbol fits inside the per-position budget (`cash ×
//! max_position_pct`). The cycle only opens positions, so SELL and HOLD
//! never pass.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::broker::ResilientBroker;
use crate::config::PaperConfig;
use crate::engine::RiskManager;
use crate::types::Signal;

#[derive(Debug, Clone)]
pub struct RiskLimits {
    pub max_open_positions: usize,
    /// Fraction of cash a single new position may use.
    pub max_position_pct: Decimal,
}

impl RiskLimits {
    pub fn from_config(cfg: &PaperConfig) -> Self {
        Self {
            max_open_positions: cfg.max_open_positions,
            max_position_pct: Decimal::from_f64(cfg.max_position_pct).unwrap_or(Decimal::ZERO),
        }
    }
}

/// Why a trade was blocked.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskRejection {
    NotTradable(Signal),
    TooManyPositions { open: usize, max: usize },
    OverBudget { price: Decimal, budget: Decimal },
}

impl fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskRejection::NotTradable(signal) => write!(f, "{signal} is not an entry signal"),
            RiskRejection::TooManyPositions { open, max } => {
                write!(f, "{open} positions open (max {max})")
            }
            RiskRejection::OverBudget { price, budget } => {
                write!(f, "price {price} exceeds per-position budget {budget}")
            }
        }
    }
}

pub struct LimitsRiskManager {
    broker: Arc<ResilientBroker>,
    limits: RiskLimits,
}

impl LimitsRiskManager {
    pub fn new(broker: Arc<ResilientBroker>, limits: RiskLimits) -> Self {
        Self { broker, limits }
    }

    async fn evaluate(&self, symbol: &str, signal: Signal) -> Result<Option<RiskRejection>> {
        if signal != Signal::Buy {
            return Ok(Some(RiskRejection::NotTradable(signal)));
        }

        let positions = self
            .broker
            .get_positions()
            .await
            .into_result()
            .context("failed to fetch positions for risk check")?;

        if positions.len() >= self.limits.max_open_positions {
            return Ok(Some(RiskRejection::TooManyPositions {
                open: positions.len(),
                max: self.limits.max_open_positions,
            }));
        }

        let cash = self
            .broker
            .get_balance()
            .await
            .into_result()
            .context("failed to fetch balance for risk check")?;
        let quote = self
            .broker
            .get_quote(symbol)
            .await
            .into_result()
            .with_context(|| format!("failed to quote {symbol} for risk check"))?;

        let budget = cash * self.limits.max_position_pct;
        if quote.price <= Decimal::ZERO || quote.price > budget {
            return Ok(Some(RiskRejection::OverBudget {
                price: quote.price,
                budget,
            }));
        }
        Ok(None)
    }
}

#[async_trait]
impl RiskManager for LimitsRiskManager {
    async fn check_risk(&self, symbol: &str, signal: Signal) -> Result<bool> {
        match self.evaluate(symbol, signal).await? {
            Some(rejection) => {
                debug!(symbol, signal = %signal, reason = %rejection, "Risk check failed");
                Ok(false)
            }
            None => Ok(true),
        }
    }
}
