//! Stop-loss / take-profit exits for open positions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::broker::ResilientBroker;
use crate::config::PaperConfig;
use crate::engine::PositionMonitor;
use crate::types::{OrderRequest, OrderSide, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop loss"),
            ExitReason::TakeProfit => write!(f, "take profit"),
        }
    }
}

/// Band around the entry price, as fractions (0.05 = 5 %).
#[derive(Debug, Clone)]
pub struct ExitBand {
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
}

impl ExitBand {
    pub fn from_config(cfg: &PaperConfig) -> Self {
        Self {
            stop_loss_pct: Decimal::from_f64(cfg.stop_loss_pct).unwrap_or(Decimal::ZERO),
            take_profit_pct: Decimal::from_f64(cfg.take_profit_pct).unwrap_or(Decimal::ZERO),
        }
    }

    /// Whether `price` has left the band around `position.avg_price`.
    pub fn breach(&self, position: &Position, price: Decimal) -> Option<ExitReason> {
        if position.avg_price <= Decimal::ZERO {
            return None;
        }
        let change = (price - position.avg_price) / position.avg_price;
        if self.stop_loss_pct > Decimal::ZERO && change <= -self.stop_loss_pct {
            Some(ExitReason::StopLoss)
        } else if self.take_profit_pct > Decimal::ZERO && change >= self.take_profit_pct {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }
}

/// Closes a whole position once its price breaches the exit band.
pub struct StopLossMonitor {
    broker: Arc<ResilientBroker>,
    band: ExitBand,
}

impl StopLossMonitor {
    pub fn new(broker: Arc<ResilientBroker>, band: ExitBand) -> Self {
        Self { broker, band }
    }
}

#[async_trait]
impl PositionMonitor for StopLossMonitor {
    async fn check_position(&self, position: &Position) -> Result<()> {
        let quote = self
            .broker
            .get_quote(&position.symbol)
            .await
            .into_fresh_result()
            .with_context(|| format!("no fresh quote for {}", position.symbol))?;

        let Some(reason) = self.band.breach(position, quote.price) else {
            debug!(symbol = %position.symbol, price = %quote.price, entry = %position.avg_price, "Within exit band");
            return Ok(());
        };

        let order = OrderRequest {
            symbol: position.symbol.clone(),
            side: OrderSide::Sell,
            quantity: position.quantity,
        };
        let receipt = self
            .broker
            .place_order(&order)
            .await
            .into_result()
            .with_context(|| format!("failed to close {} on {reason}", position.symbol))?;

        info!(
            symbol = %position.symbol,
            reason = %reason,
            entry = %position.avg_price,
            exit = %receipt.fill_price,
            quantity = %receipt.quantity,
            order_id = %receipt.order_id,
            "Position closed"
        );
        Ok(())
    }
}
