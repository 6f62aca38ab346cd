//! In-memory paper broker.
//!
//! Tracks cash and positions locally and fills every order in full at the
//! latest price. Prices come from explicit overrides first, then from the
//! last close the history client returns.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::BrokerApi;
use crate::data::{HistoryPeriod, MultiSourceDataClient};
use crate::resilience::ServiceError;
use crate::types::{OrderReceipt, OrderRequest, OrderSide, Position, Quote};

struct Book {
    cash: Decimal,
    positions: HashMap<String, Position>,
}

pub struct PaperBroker {
    book: Mutex<Book>,
    prices: Mutex<HashMap<String, Decimal>>,
    history: Option<Arc<MultiSourceDataClient>>,
}

impl PaperBroker {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            book: Mutex::new(Book {
                cash: starting_cash,
                positions: HashMap::new(),
            }),
            prices: Mutex::new(HashMap::new()),
            history: None,
        }
    }

    /// Price symbols without an override from their latest daily close.
    pub fn with_history(mut self, history: Arc<MultiSourceDataClient>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().insert(symbol.to_string(), price);
    }

    async fn latest_price(&self, symbol: &str) -> Result<Decimal, ServiceError> {
        let overridden = self.prices.lock().get(symbol).copied();
        if let Some(price) = overridden {
            return Ok(price);
        }
        let Some(history) = &self.history else {
            return Err(ServiceError::rejected(format!("no price for {symbol}")));
        };

        let result = history.get_history(symbol, HistoryPeriod::FiveDays).await;
        let close = result
            .data
            .last()
            .map(|bar| bar.close)
            .ok_or_else(|| ServiceError::transient(format!("no recent bars for {symbol}")))?;
        Decimal::from_f64(close)
            .map(|d| d.round_dp(4))
            .ok_or_else(|| ServiceError::rejected(format!("unrepresentable price {close} for {symbol}")))
    }
}

#[async_trait]
impl BrokerApi for PaperBroker {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, ServiceError> {
        Ok(Quote {
            symbol: symbol.to_string(),
            price: self.latest_price(symbol).await?,
            timestamp: Utc::now(),
        })
    }

    async fn get_balance(&self) -> Result<Decimal, ServiceError> {
        Ok(self.book.lock().cash)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderReceipt, ServiceError> {
        if order.quantity <= Decimal::ZERO {
            return Err(ServiceError::rejected(format!(
                "invalid quantity {} for {}",
                order.quantity, order.symbol
            )));
        }
        let price = self.latest_price(&order.symbol).await?;
        let notional = price * order.quantity;

        let mut book = self.book.lock();
        match order.side {
            OrderSide::Buy => {
                if notional > book.cash {
                    return Err(ServiceError::rejected(format!(
                        "insufficient cash: need {notional}, have {}",
                        book.cash
                    )));
                }
                book.cash -= notional;
                let pos = book
                    .positions
                    .entry(order.symbol.clone())
                    .or_insert_with(|| Position {
                        symbol: order.symbol.clone(),
                        quantity: Decimal::ZERO,
                        avg_price: Decimal::ZERO,
                    });
                let total = pos.quantity + order.quantity;
                pos.avg_price = (pos.avg_price * pos.quantity + notional) / total;
                pos.quantity = total;
            }
            OrderSide::Sell => {
                let held = book
                    .positions
                    .get(&order.symbol)
                    .map(|p| p.quantity)
                    .unwrap_or(Decimal::ZERO);
                if held < order.quantity {
                    return Err(ServiceError::rejected(format!(
                        "cannot sell {} {}: holding {held}",
                        order.quantity, order.symbol
                    )));
                }
                book.cash += notional;
                if held == order.quantity {
                    book.positions.remove(&order.symbol);
                } else if let Some(pos) = book.positions.get_mut(&order.symbol) {
                    pos.quantity -= order.quantity;
                }
            }
        }

        let receipt = OrderReceipt {
            order_id: Uuid::new_v4().to_string(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            fill_price: price,
            timestamp: Utc::now(),
        };
        info!(
            order_id = %receipt.order_id,
            symbol = %receipt.symbol,
            side = %receipt.side,
            quantity = %receipt.quantity,
            price = %price,
            cash = %book.cash,
            "Paper order filled"
        );
        Ok(receipt)
    }

    async fn get_positions(&self) -> Result<Vec<Position>, ServiceError> {
        let mut positions: Vec<Position> = self.book.lock().positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }
}
