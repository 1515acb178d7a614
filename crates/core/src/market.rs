//! Market inputs consumed by strategies and the risk fence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Broad direction of the underlying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

/// One observation of the market, taken at the start of a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timestamp: DateTime<Utc>,
    pub vix: f64,
    /// Implied-volatility rank, 0..100.
    pub iv_rank: f64,
    /// Intraday high/low range of the underlying, in percent.
    pub daily_range_pct: f64,
    pub trend: Trend,
    /// Absolute move of the broad market since the prior close, as a fraction.
    pub market_move_abs_pct: f64,
    /// Symbols with a pending news event in the current window.
    #[serde(default)]
    pub news_symbols: HashSet<String>,
}

impl MarketSnapshot {
    /// Quiet-market snapshot, useful as a starting point.
    #[must_use]
    pub fn calm(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            vix: 15.0,
            iv_rank: 50.0,
            daily_range_pct: 0.8,
            trend: Trend::Neutral,
            market_move_abs_pct: 0.0,
            news_symbols: HashSet::new(),
        }
    }

    /// Circuit-breaker inputs for a single symbol.
    #[must_use]
    pub fn signal_for(&self, symbol: &str) -> MarketSignal {
        MarketSignal {
            market_move_abs_pct: self.market_move_abs_pct,
            news_flag: self.news_symbols.contains(symbol),
        }
    }
}

/// The explicit market argument to admission.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketSignal {
    pub market_move_abs_pct: f64,
    pub news_flag: bool,
}

/// A proposed trade. Produced by a strategy and discarded after admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTrade {
    pub strategy_id: String,
    pub symbol: String,
    /// Strategy's own size suggestion as a fraction of balance; advisory.
    pub proposed_size: f64,
    /// Model probability of profit, 0..1.
    pub edge_score: f64,
    /// Risk this trade would consume as a fraction of balance.
    pub estimated_risk: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_for_picks_up_symbol_news() {
        let mut snapshot = MarketSnapshot::calm(Utc::now());
        snapshot.market_move_abs_pct = 0.011;
        snapshot.news_symbols.insert("QQQ".to_string());

        let qqq = snapshot.signal_for("QQQ");
        assert!(qqq.news_flag);
        assert!((qqq.market_move_abs_pct - 0.011).abs() < f64::EPSILON);
        assert!(!snapshot.signal_for("SPY").news_flag);
    }
}
