//! Trade executor and portfolio view over the resilient broker.
//!
//! The cycle only opens positions: BUY orders are sized as
//! `floor(cash × max_position_pct / price)` whole units. Positions are
//! closed by the exit monitor, so SELL and HOLD are rejected here. A broker
//! rejection becomes [`ExecutionOutcome::Rejected`]; an unreachable broker
//! or a stale quote is an error.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use super::{PortfolioProvider, TradeExecutor};
use crate::broker::ResilientBroker;
use crate::resilience::{CallFailure, CallOutcome};
use crate::types::{ExecutionOutcome, OrderRequest, OrderSide, Position, Signal};

/// Whole units affordable with `cash × pct` at `price`.
pub fn position_size(cash: Decimal, pct: Decimal, price: Decimal) -> Decimal {
    if price <= Decimal::ZERO || cash <= Decimal::ZERO || pct <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (cash * pct / price).floor()
}

pub struct BrokerExecutor {
    broker: Arc<ResilientBroker>,
    max_position_pct: Decimal,
}

impl BrokerExecutor {
    pub fn new(broker: Arc<ResilientBroker>, max_position_pct: Decimal) -> Self {
        Self {
            broker,
            max_position_pct,
        }
    }

    async fn build_order(&self, symbol: &str, signal: Signal) -> Result<Result<OrderRequest, String>> {
        match signal {
            Signal::Sell | Signal::Hold => Ok(Err(format!("{signal} is not an entry signal"))),
            Signal::Buy => {
                let cash = self
                    .broker
                    .get_balance()
                    .await
                    .into_result()
                    .context("failed to fetch balance")?;
                let quote = self
                    .broker
                    .get_quote(symbol)
                    .await
                    .into_fresh_result()
                    .with_context(|| format!("no fresh quote for {symbol}"))?;

                let quantity = position_size(cash, self.max_position_pct, quote.price);
                debug!(symbol, cash = %cash, price = %quote.price, quantity = %quantity, "Sized order");
                if quantity.is_zero() {
                    return Ok(Err(format!(
                        "budget {} buys no units at {}",
                        cash * self.max_position_pct,
                        quote.price
                    )));
                }
                Ok(Ok(OrderRequest {
                    symbol: symbol.to_string(),
                    side: OrderSide::Buy,
                    quantity,
                }))
            }
        }
    }
}

#[async_trait]
impl TradeExecutor for BrokerExecutor {
    async fn execute_trade(&self, symbol: &str, signal: Signal) -> Result<ExecutionOutcome> {
        let order = match self.build_order(symbol, signal).await? {
            Ok(order) => order,
            Err(error) => return Ok(ExecutionOutcome::Rejected { error }),
        };

        match self.broker.place_order(&order).await {
            CallOutcome::Live(receipt) | CallOutcome::Cached(receipt) => {
                info!(
                    symbol = %receipt.symbol,
                    side = %receipt.side,
                    quantity = %receipt.quantity,
                    price = %receipt.fill_price,
                    order_id = %receipt.order_id,
                    "Order filled"
                );
                Ok(ExecutionOutcome::Accepted {
                    order_id: receipt.order_id,
                })
            }
            CallOutcome::Failed(CallFailure::Rejected(error)) => Ok(ExecutionOutcome::Rejected { error }),
            CallOutcome::Failed(failure) | CallOutcome::Stale { failure, .. } => {
                Err(anyhow!(failure)).with_context(|| format!("order for {symbol} not placed"))
            }
        }
    }
}

#[async_trait]
impl PortfolioProvider for BrokerExecutor {
    async fn get_open_positions(&self) -> Result<Vec<Position>> {
        self.broker
            .get_positions()
            .await
            .into_result()
            .context("failed to fetch open positions")
    }
}
