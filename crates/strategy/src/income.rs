use crate::strategy_set::CandidateGenerator;
use robopilot_core::{AccountState, CandidateTrade, IncomeConfig, MarketSnapshot, Trend};

/// Multi-day premium selling on index ETFs.
///
/// Rotates through the configured symbols by the number of trades already
/// taken today and stops once the daily cap is reached.
#[derive(Debug, Clone)]
pub struct IncomeStrategySet {
    config: IncomeConfig,
}

impl IncomeStrategySet {
    #[must_use]
    pub const fn new(config: IncomeConfig) -> Self {
        Self { config }
    }

    fn dte(&self, preferred: u32) -> u32 {
        preferred.clamp(self.config.min_dte, self.config.max_dte.max(self.config.min_dte))
    }

    fn select(&self, market: &MarketSnapshot) -> Option<(&'static str, u32, f64)> {
        let cfg = &self.config;
        let iv = market.iv_rank;

        if iv > cfg.high_iv_rank {
            Some(("iron_condor", self.dte(5), 0.5 + (iv - 50.0) / 200.0))
        } else if iv > cfg.mid_iv_rank && market.trend == Trend::Neutral {
            Some(("credit_spread", self.dte(3), 0.5 + (iv - 30.0) / 250.0))
        } else if market.trend == Trend::Bullish {
            Some(("covered_call", self.dte(cfg.max_dte), 0.55 + iv / 1000.0))
        } else {
            None
        }
    }
}

impl CandidateGenerator for IncomeStrategySet {
    fn name(&self) -> &'static str {
        "income"
    }

    fn generate(&self, market: &MarketSnapshot, account: &AccountState) -> Vec<CandidateTrade> {
        if account.trades_today >= self.config.max_daily_trades || self.config.symbols.is_empty() {
            return Vec::new();
        }
        let Some((structure, dte, edge)) = self.select(market) else {
            return Vec::new();
        };

        let idx = account.trades_today as usize % self.config.symbols.len();
        vec![CandidateTrade {
            strategy_id: format!("{structure}_{dte}dte"),
            symbol: self.config.symbols[idx].clone(),
            proposed_size: self.config.estimated_risk,
            edge_score: edge.clamp(0.0, 1.0),
            estimated_risk: self.config.estimated_risk,
        }]
    }
}
