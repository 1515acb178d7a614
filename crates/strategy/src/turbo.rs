use crate::strategy_set::CandidateGenerator;
use robopilot_core::{AccountState, CandidateTrade, MarketSnapshot, TurboConfig};

/// Same-day expiration trading on a single underlying.
#[derive(Debug, Clone)]
pub struct TurboStrategySet {
    config: TurboConfig,
}

impl TurboStrategySet {
    #[must_use]
    pub const fn new(config: TurboConfig) -> Self {
        Self { config }
    }

    fn select(&self, market: &MarketSnapshot) -> Option<(&'static str, f64)> {
        let cfg = &self.config;

        if market.vix < cfg.condor_max_vix && market.daily_range_pct < cfg.condor_max_range_pct {
            Some(("iron_condor_0dte", 0.5 + (cfg.condor_max_vix - market.vix) / 50.0))
        } else if market.vix < cfg.spread_max_vix {
            Some(("credit_spread_0dte", 0.5 + (cfg.spread_max_vix - market.vix) / 60.0))
        } else {
            None
        }
    }
}

impl CandidateGenerator for TurboStrategySet {
    fn name(&self) -> &'static str {
        "turbo"
    }

    fn generate(&self, market: &MarketSnapshot, account: &AccountState) -> Vec<CandidateTrade> {
        if account.trades_today >= self.config.max_daily_trades {
            return Vec::new();
        }

        self.select(market)
            .map(|(strategy_id, edge)| CandidateTrade {
                strategy_id: strategy_id.to_string(),
                symbol: self.config.symbol.clone(),
                proposed_size: self.config.estimated_risk,
                edge_score: edge.clamp(0.0, 1.0),
                estimated_risk: self.config.estimated_risk,
            })
            .into_iter()
            .collect()
    }
}
