//! Trade decision rule.

use crate::types::{DecisionReason, Opportunity, TradeDecision};

/// Decide whether to trade an opportunity.
///
/// Trade iff the final score reaches `min_score`, no position is open for
/// the symbol, and the risk check passed. The reason names the first
/// failing condition in that order.
pub fn make_trade_decision(
    opportunity: &Opportunity,
    min_score: f64,
    has_position: bool,
    risk_ok: bool,
) -> TradeDecision {
    let score = opportunity.final_score();
    let reason = if score < min_score {
        DecisionReason::ScoreBelowThreshold
    } else if has_position {
        DecisionReason::ExistingPosition
    } else if !risk_ok {
        DecisionReason::RiskCheckFailed
    } else {
        DecisionReason::Accepted
    };

    TradeDecision {
        symbol: opportunity.symbol.clone(),
        signal: opportunity.signal,
        score,
        should_trade: reason == DecisionReason::Accepted,
        reason,
    }
}
