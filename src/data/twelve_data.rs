//! Twelve Data time-series provider.
//!
//! API: `https://api.twelvedata.com/time_series`
//! Auth: API key (query parameter).
//! Errors arrive in-band as `{"status": "error", "code": ..., "message": ...}`.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{clean_symbol, get_json, http_client, parse_number, HistoryPeriod, HistoryProvider};
use crate::resilience::ServiceError;
use crate::types::Bar;

const BASE_URL: &str = "https://api.twelvedata.com/time_series";

#[derive(Debug, Deserialize)]
struct SeriesResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    values: Vec<SeriesValue>,
}

#[derive(Debug, Deserialize)]
struct SeriesValue {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    volume: Option<String>,
}

pub struct TwelveDataProvider {
    http: Client,
    api_key: Secret<String>,
}

impl TwelveDataProvider {
    pub fn new(api_key: Secret<String>, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
        })
    }

    fn parse(body: SeriesResponse) -> Result<Vec<Bar>, ServiceError> {
        if body.status == "error" {
            let msg = body.message.unwrap_or_default();
            return match body.code {
                Some(429) | Some(500..=599) => {
                    Err(ServiceError::transient(format!("twelve_data: {msg}")))
                }
                // 400/404: unknown symbol or unsupported exchange.
                Some(400) | Some(404) => Ok(Vec::new()),
                _ => Err(ServiceError::rejected(format!("twelve_data: {msg}"))),
            };
        }

        let mut bars = body
            .values
            .into_iter()
            .map(|v| {
                Ok(Bar {
                    time: parse_datetime(&v.datetime)?,
                    open: parse_number(&v.open, "open")?,
                    high: parse_number(&v.high, "high")?,
                    low: parse_number(&v.low, "low")?,
                    close: parse_number(&v.close, "close")?,
                    volume: match v.volume.as_deref() {
                        Some(raw) => parse_number(raw, "volume")?,
                        None => 0.0,
                    },
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;
        // Newest first on the wire.
        bars.sort_by_key(|b| b.time);
        Ok(bars)
    }
}

fn parse_datetime(raw: &str) -> Result<chrono::DateTime<Utc>, ServiceError> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| ServiceError::rejected(format!("twelve_data: bad datetime {raw:?}")))?;
    Ok(Utc.from_utc_datetime(&naive))
}

#[async_trait]
impl HistoryProvider for TwelveDataProvider {
    fn name(&self) -> &str {
        "twelve_data"
    }

    async fn fetch_history(
        &self,
        symbol: &str,
        period: HistoryPeriod,
    ) -> Result<Vec<Bar>, ServiceError> {
        let symbol = clean_symbol(symbol);
        let url = format!(
            "{BASE_URL}?symbol={}&interval=1day&outputsize={}&apikey={}",
            urlencoding::encode(&symbol),
            period.days(),
            urlencoding::encode(self.api_key.expose_secret()),
        );
        debug!(symbol = %symbol, "Fetching Twelve Data series");

        let body: SeriesResponse = get_json(&self.http, &url, "twelve_data").await?;
        Self::parse(body)
    }
}
