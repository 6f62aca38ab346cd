//! Watchlist scanner and momentum analyzer.
//!
//! Both score symbols from daily history fetched through the multi-source
//! client. The scanner takes a short look (five sessions) across the whole
//! watchlist; the analyzer takes a longer look at one symbol. Only BUY
//! setups are returned, since the cycle opens positions and the exit
//! monitor closes them.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Analyzer, Scanner};
use crate::data::{HistoryPeriod, MultiSourceDataClient};
use crate::strategy::momentum;
use crate::types::{Analysis, Opportunity, Signal};

/// Market category of a symbol. Buenos Aires listings (`.BA`) are local
/// shares; anything else is treated as a CEDEAR.
pub fn category_of(symbol: &str) -> &'static str {
    if symbol.to_ascii_uppercase().ends_with(".BA") {
        "acciones"
    } else {
        "cedears"
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct WatchlistScanner {
    data: Arc<MultiSourceDataClient>,
    watchlist: Vec<String>,
    period: HistoryPeriod,
}

impl WatchlistScanner {
    pub fn new(data: Arc<MultiSourceDataClient>, watchlist: Vec<String>) -> Self {
        Self {
            data,
            watchlist,
            period: HistoryPeriod::FiveDays,
        }
    }
}

#[async_trait]
impl Scanner for WatchlistScanner {
    async fn scan(
        &self,
        categories: &[String],
        max_symbols: usize,
        use_cache: bool,
    ) -> Result<Vec<Opportunity>> {
        let symbols: Vec<&String> = self
            .watchlist
            .iter()
            .filter(|s| categories.is_empty() || categories.iter().any(|c| c == category_of(s)))
            .take(max_symbols)
            .collect();
        info!(symbols = symbols.len(), categories = ?categories, "Scanning watchlist");

        let mut found = Vec::new();
        let mut scored = 0usize;
        let mut unavailable = 0usize;
        for symbol in symbols {
            if !use_cache {
                self.data.invalidate(symbol);
            }
            let history = self.data.get_history(symbol, self.period).await;
            let Some(m) = momentum(&history.data) else {
                unavailable += 1;
                continue;
            };
            debug!(
                symbol = %symbol,
                source = history.source.as_deref().unwrap_or("-"),
                score = m.score,
                signal = %m.signal,
                "Scanned"
            );
            scored += 1;
            if m.signal == Signal::Buy {
                found.push(Opportunity::new(symbol.clone(), m.score, m.signal));
            }
        }

        if scored == 0 && unavailable > 0 {
            bail!("no history for any of {unavailable} scanned symbols");
        }
        found.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

pub struct MomentumAnalyzer {
    data: Arc<MultiSourceDataClient>,
    period: HistoryPeriod,
}

impl MomentumAnalyzer {
    pub fn new(data: Arc<MultiSourceDataClient>) -> Self {
        Self {
            data,
            period: HistoryPeriod::ThreeMonths,
        }
    }
}

#[async_trait]
impl Analyzer for MomentumAnalyzer {
    async fn analyze(&self, symbol: &str) -> Result<Analysis> {
        let history = self.data.get_history(symbol, self.period).await;
        let Some(m) = momentum(&history.data) else {
            bail!("not enough history to analyze {symbol}");
        };
        if m.signal != Signal::Buy {
            bail!("{symbol} is {} over {} bars, no entry", m.signal, history.data.len());
        }

        Ok(Analysis {
            symbol: symbol.to_string(),
            score: m.score,
            signal: Some(m.signal),
            summary: format!(
                "{:+.1}% over {} bars, {:+.1}% vs mean (via {})",
                m.change_pct,
                history.data.len(),
                m.trend_pct,
                history.source.as_deref().unwrap_or("-"),
            ),
        })
    }
}
