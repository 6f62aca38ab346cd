//! Yahoo Finance history provider.
//!
//! Uses the public chart endpoint. Keeps exchange suffixes such as `.BA`,
//! since Yahoo lists Buenos Aires tickers under them.
//!
//! API: `https://query1.finance.yahoo.com/v8/finance/chart/{symbol}`
//! Auth: None required.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{http_client, HistoryPeriod, HistoryProvider};
use crate::resilience::ServiceError;
use crate::types::Bar;

const BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

/// Yahoo leaves gaps as `null`.
#[derive(Debug, Deserialize, Default)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct YahooProvider {
    http: Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new(timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: BASE_URL.to_string(),
        })
    }

    fn parse(body: ChartEnvelope) -> Result<Vec<Bar>, ServiceError> {
        if let Some(err) = body.chart.error {
            // "Not Found" means an unknown symbol, not a broken source.
            if err.code.eq_ignore_ascii_case("not found") {
                return Ok(Vec::new());
            }
            return Err(ServiceError::rejected(format!(
                "yahoo: {}: {}",
                err.code, err.description
            )));
        }

        let Some(result) = body.chart.result.and_then(|r| r.into_iter().next()) else {
            return Ok(Vec::new());
        };
        let series = result.indicators.quote.into_iter().next().unwrap_or_default();

        let bars = result
            .timestamp
            .iter()
            .enumerate()
            .filter_map(|(i, ts)| {
                let close = series.close.get(i).copied().flatten()?;
                let time = Utc.timestamp_opt(*ts, 0).single()?;
                let at = |v: &Vec<Option<f64>>| v.get(i).copied().flatten().unwrap_or(close);
                Some(Bar {
                    time,
                    open: at(&series.open),
                    high: at(&series.high),
                    low: at(&series.low),
                    close,
                    volume: series.volume.get(i).copied().flatten().unwrap_or(0.0),
                })
            })
            .collect();
        Ok(bars)
    }
}

#[async_trait]
impl HistoryProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn fetch_history(
        &self,
        symbol: &str,
        period: HistoryPeriod,
    ) -> Result<Vec<Bar>, ServiceError> {
        let url = format!(
            "{}/{}?range={}&interval=1d",
            self.base_url,
            urlencoding::encode(symbol.trim()),
            period.as_range()
        );
        debug!(symbol, range = period.as_range(), "Fetching Yahoo chart");

        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(ServiceError::from_status(status, "yahoo"));
        }
        let body: ChartEnvelope = resp
            .json()
            .await
            .map_err(|e| ServiceError::rejected(format!("yahoo: malformed response: {e}")))?;
        Self::parse(body)
    }
}
