//! Strategy building blocks: momentum scoring, risk limits and exits.
//!
//! The momentum score is a plain heuristic over daily closes, not a
//! prediction model. It maps recent return and position relative to the
//! moving average onto 0–100, where 50 is neutral.

pub mod exits;
pub mod risk;

use serde::Serialize;

use crate::types::{Bar, Signal};

/// Score points per percent of return over the window.
const RETURN_WEIGHT: f64 = 2.5;

/// Score points per percent the last close sits above its average.
const TREND_WEIGHT: f64 = 2.0;

/// Absolute return (percent) below which the signal is HOLD.
const NEUTRAL_BAND_PCT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Momentum {
    /// 0–100; above 50 is bullish.
    pub score: f64,
    pub signal: Signal,
    /// Return from first to last close, in percent.
    pub change_pct: f64,
    /// Distance of the last close from the mean close, in percent.
    pub trend_pct: f64,
}

/// Score a series of bars, oldest first.
///
/// Returns `None` with fewer than two usable closes.
pub fn momentum(bars: &[Bar]) -> Option<Momentum> {
    let closes: Vec<f64> = bars
        .iter()
        .map(|b| b.close)
        .filter(|c| c.is_finite() && *c > 0.0)
        .collect();
    if closes.len() < 2 {
        return None;
    }

    let first = closes[0];
    let last = closes[closes.len() - 1];
    let mean = closes.iter().sum::<f64>() / closes.len() as f64;

    let change_pct = (last / first - 1.0) * 100.0;
    let trend_pct = (last / mean - 1.0) * 100.0;
    let score = (50.0 + change_pct * RETURN_WEIGHT + trend_pct * TREND_WEIGHT).clamp(0.0, 100.0);

    let signal = if change_pct > NEUTRAL_BAND_PCT && trend_pct >= 0.0 {
        Signal::Buy
    } else if change_pct < -NEUTRAL_BAND_PCT && trend_pct <= 0.0 {
        Signal::Sell
    } else {
        Signal::Hold
    };

    Some(Momentum {
        score,
        signal,
        change_pct,
        trend_pct,
    })
}
