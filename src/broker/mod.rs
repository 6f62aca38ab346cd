//! Brokerage integration.
//!
//! `BrokerApi` is the raw surface a brokerage exposes. `ResilientBroker`
//! wraps each operation in its own [`ResilientCall`] so quotes are cached,
//! balances are always live, and orders are never replayed.

pub mod paper;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

use crate::resilience::{CallOutcome, OperationConfig, ResilienceRegistry, ResilientCall, RetryPolicy, ServiceError};
use crate::types::{OrderReceipt, OrderRequest, Position, Quote};

pub use paper::PaperBroker;

/// Breaker and rate-limit key shared by every brokerage operation.
pub const BROKER_DEPENDENCY: &str = "broker";

/// Raw brokerage operations. Implementors classify their failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerApi: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> Result<Quote, ServiceError>;

    /// Cash available for new orders.
    async fn get_balance(&self) -> Result<Decimal, ServiceError>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderReceipt, ServiceError>;

    async fn get_positions(&self) -> Result<Vec<Position>, ServiceError>;
}

/// Timing knobs for [`ResilientBroker`].
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub quote_ttl: Duration,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            quote_ttl: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct ResilientBroker {
    api: Arc<dyn BrokerApi>,
    quotes: ResilientCall<Quote>,
    balance: ResilientCall<Decimal>,
    orders: ResilientCall<OrderReceipt>,
    positions: ResilientCall<Vec<Position>>,
}

impl ResilientBroker {
    pub fn new(api: Arc<dyn BrokerApi>, registry: Arc<ResilienceRegistry>, settings: BrokerSettings) -> Self {
        let op = |name: &str| {
            OperationConfig::new(name, BROKER_DEPENDENCY)
                .retry(settings.retry.clone())
                .timeout(settings.timeout)
        };

        Self {
            api,
            quotes: ResilientCall::new(
                op("get_quote").cache_ttl(Some(settings.quote_ttl)),
                Arc::clone(&registry),
            ),
            balance: ResilientCall::new(op("get_balance"), Arc::clone(&registry)),
            // A retried order after an ambiguous timeout could fill twice.
            orders: ResilientCall::new(op("place_order").retry(RetryPolicy::none()), Arc::clone(&registry)),
            positions: ResilientCall::new(op("get_positions"), registry),
        }
    }

    pub async fn get_quote(&self, symbol: &str) -> CallOutcome<Quote> {
        let api = &self.api;
        self.quotes.execute(symbol, || api.get_quote(symbol)).await
    }

    pub async fn get_balance(&self) -> CallOutcome<Decimal> {
        let api = &self.api;
        self.balance.execute("balance", || api.get_balance()).await
    }

    pub async fn place_order(&self, order: &OrderRequest) -> CallOutcome<OrderReceipt> {
        let api = &self.api;
        self.orders.execute(&order.symbol, || api.place_order(order)).await
    }

    pub async fn get_positions(&self) -> CallOutcome<Vec<Position>> {
        let api = &self.api;
        self.positions.execute("positions", || api.get_positions()).await
    }
}
