//! Alpha Vantage daily history provider.
//!
//! API: `https://www.alphavantage.co/query?function=TIME_SERIES_DAILY`
//! Auth: API key (query parameter).
//! Rate limit: 5 calls/minute on the free tier. Throttling is reported
//! in-band with HTTP 200 and a `Note` or `Information` field.

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::{clean_symbol, get_json, http_client, parse_number, HistoryPeriod, HistoryProvider};
use crate::resilience::ServiceError;
use crate::types::Bar;

const BASE_URL: &str = "https://www.alphavantage.co/query";

#[derive(Debug, Deserialize)]
struct DailyResponse {
    #[serde(rename = "Time Series (Daily)", default)]
    series: Option<BTreeMap<String, DailyBar>>,
    #[serde(rename = "Error Message", default)]
    error_message: Option<String>,
    #[serde(rename = "Note", default)]
    note: Option<String>,
    #[serde(rename = "Information", default)]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyBar {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: String,
}

pub struct AlphaVantageProvider {
    http: Client,
    api_key: Secret<String>,
}

impl AlphaVantageProvider {
    pub fn new(api_key: Secret<String>, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
        })
    }

    fn parse(body: DailyResponse, period: HistoryPeriod) -> Result<Vec<Bar>, ServiceError> {
        if let Some(msg) = body.note.or(body.information) {
            return Err(ServiceError::transient(format!("alpha_vantage: throttled: {msg}")));
        }
        if let Some(msg) = body.error_message {
            // Unknown symbols come back as an error message.
            debug!(error = %msg, "Alpha Vantage returned no series");
            return Ok(Vec::new());
        }
        let Some(series) = body.series else {
            return Ok(Vec::new());
        };

        let cutoff = Utc::now().date_naive() - chrono::Duration::days(period.days());
        let mut bars = Vec::with_capacity(series.len());
        // BTreeMap iterates dates ascending.
        for (date, raw) in series {
            let day = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|_| ServiceError::rejected(format!("alpha_vantage: bad date {date:?}")))?;
            if day < cutoff {
                continue;
            }
            let Some(time) = day.and_hms_opt(0, 0, 0).map(|t| Utc.from_utc_datetime(&t)) else {
                continue;
            };
            bars.push(Bar {
                time,
                open: parse_number(&raw.open, "open")?,
                high: parse_number(&raw.high, "high")?,
                low: parse_number(&raw.low, "low")?,
                close: parse_number(&raw.close, "close")?,
                volume: parse_number(&raw.volume, "volume")?,
            });
        }
        Ok(bars)
    }
}

#[async_trait]
impl HistoryProvider for AlphaVantageProvider {
    fn name(&self) -> &str {
        "alpha_vantage"
    }

    async fn fetch_history(
        &self,
        symbol: &str,
        period: HistoryPeriod,
    ) -> Result<Vec<Bar>, ServiceError> {
        let symbol = clean_symbol(symbol);
        let output_size = if period.days() > 100 { "full" } else { "compact" };
        let url = format!(
            "{BASE_URL}?function=TIME_SERIES_DAILY&symbol={}&outputsize={output_size}&apikey={}",
            urlencoding::encode(&symbol),
            urlencoding::encode(self.api_key.expose_secret()),
        );
        debug!(symbol = %symbol, output_size, "Fetching Alpha Vantage series");

        let body: DailyResponse = get_json(&self.http, &url, "alpha_vantage").await?;
        Self::parse(body, period)
    }
}
