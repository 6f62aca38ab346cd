//! Historical market data providers.
//!
//! Defines the `HistoryProvider` trait, the multi-source client that walks
//! the fallback chain, and concrete HTTP providers for Yahoo Finance,
//! Alpha Vantage, Finnhub and Twelve Data.

pub mod alpha_vantage;
pub mod finnhub;
pub mod multi_source;
pub mod twelve_data;
pub mod yahoo;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::resilience::ServiceError;
use crate::types::Bar;

pub use multi_source::{MultiSourceDataClient, SourceResult};

/// How far back to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryPeriod {
    FiveDays,
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
}

impl HistoryPeriod {
    pub fn days(self) -> i64 {
        match self {
            HistoryPeriod::FiveDays => 5,
            HistoryPeriod::OneMonth => 30,
            HistoryPeriod::ThreeMonths => 90,
            HistoryPeriod::SixMonths => 180,
            HistoryPeriod::OneYear => 365,
        }
    }

    /// Range token used by Yahoo-style APIs.
    pub fn as_range(self) -> &'static str {
        match self {
            HistoryPeriod::FiveDays => "5d",
            HistoryPeriod::OneMonth => "1mo",
            HistoryPeriod::ThreeMonths => "3mo",
            HistoryPeriod::SixMonths => "6mo",
            HistoryPeriod::OneYear => "1y",
        }
    }
}

/// One source of daily bars.
///
/// Implementors return an empty vector when the source simply has no data
/// for the symbol, and a classified [`ServiceError`] when the call failed.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Provider name. Also the breaker and rate-limit key.
    fn name(&self) -> &str;

    async fn fetch_history(
        &self,
        symbol: &str,
        period: HistoryPeriod,
    ) -> Result<Vec<Bar>, ServiceError>;
}

/// Build the HTTP client shared by a provider.
pub(crate) fn http_client(timeout: Duration) -> Result<Client, ServiceError> {
    Client::builder()
        .timeout(timeout)
        .user_agent("VIGIL/0.1.0")
        .build()
        .map_err(|e| ServiceError::rejected(format!("failed to build HTTP client: {e}")))
}

/// GET a URL and decode its JSON body, classifying failures.
pub(crate) async fn get_json<T: DeserializeOwned>(
    http: &Client,
    url: &str,
    provider: &str,
) -> Result<T, ServiceError> {
    let resp = http.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(ServiceError::from_status(status, provider));
    }
    resp.json::<T>().await.map_err(|e| {
        ServiceError::rejected(format!("{provider}: malformed response: {e}"))
    })
}

/// Strip exchange suffixes (".BA") that keyed global providers don't use.
pub(crate) fn clean_symbol(symbol: &str) -> String {
    symbol
        .trim()
        .trim_end_matches(".BA")
        .trim_end_matches(".ba")
        .to_uppercase()
}

/// Parse a numeric field that may arrive as a string.
pub(crate) fn parse_number(raw: &str, field: &str) -> Result<f64, ServiceError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ServiceError::rejected(format!("invalid {field}: {raw:?}")))
}
