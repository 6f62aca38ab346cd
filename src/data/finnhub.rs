//! Finnhub candle provider.
//!
//! API: `https://finnhub.io/api/v1/stock/candle`
//! Auth: API token (query parameter).

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{clean_symbol, get_json, http_client, HistoryPeriod, HistoryProvider};
use crate::resilience::ServiceError;
use crate::types::Bar;

const BASE_URL: &str = "https://finnhub.io/api/v1/stock/candle";

/// Column-oriented candles. `s` is "ok" or "no_data".
#[derive(Debug, Deserialize)]
struct CandleResponse {
    s: String,
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
}

pub struct FinnhubProvider {
    http: Client,
    token: Secret<String>,
}

impl FinnhubProvider {
    pub fn new(token: Secret<String>, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            http: http_client(timeout)?,
            token,
        })
    }

    fn parse(body: CandleResponse) -> Result<Vec<Bar>, ServiceError> {
        match body.s.as_str() {
            "ok" => {}
            "no_data" => return Ok(Vec::new()),
            other => {
                return Err(ServiceError::rejected(format!("finnhub: unexpected status {other:?}")))
            }
        }

        let n = body.t.len();
        if [&body.o, &body.h, &body.l, &body.c].iter().any(|col| col.len() != n) {
            return Err(ServiceError::rejected("finnhub: candle columns differ in length"));
        }

        Ok((0..n)
            .filter_map(|i| {
                Some(Bar {
                    time: Utc.timestamp_opt(body.t[i], 0).single()?,
                    open: body.o[i],
                    high: body.h[i],
                    low: body.l[i],
                    close: body.c[i],
                    volume: body.v.get(i).copied().unwrap_or(0.0),
                })
            })
            .collect())
    }
}

#[async_trait]
impl HistoryProvider for FinnhubProvider {
    fn name(&self) -> &str {
        "finnhub"
    }

    async fn fetch_history(
        &self,
        symbol: &str,
        period: HistoryPeriod,
    ) -> Result<Vec<Bar>, ServiceError> {
        let symbol = clean_symbol(symbol);
        let to = Utc::now().timestamp();
        let from = to - period.days() * 86_400;
        let url = format!(
            "{BASE_URL}?symbol={}&resolution=D&from={from}&to={to}&token={}",
            urlencoding::encode(&symbol),
            urlencoding::encode(self.token.expose_secret()),
        );
        debug!(symbol = %symbol, from, to, "Fetching Finnhub candles");

        let body: CandleResponse = get_json(&self.http, &url, "finnhub").await?;
        Self::parse(body)
    }
}
