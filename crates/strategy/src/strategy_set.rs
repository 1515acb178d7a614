use crate::income::IncomeStrategySet;
use crate::turbo::TurboStrategySet;
use robopilot_core::{AccountState, CandidateTrade, MarketSnapshot, StrategiesConfig, TradingMode};

/// Produces candidate trades from a market snapshot.
pub trait CandidateGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    fn generate(&self, market: &MarketSnapshot, account: &AccountState) -> Vec<CandidateTrade>;
}

/// The strategy set active for a trading mode.
#[derive(Debug, Clone)]
pub enum StrategySet {
    Income(IncomeStrategySet),
    Turbo(TurboStrategySet),
}

impl StrategySet {
    #[must_use]
    pub fn for_mode(mode: TradingMode, config: &StrategiesConfig) -> Self {
        match mode {
            TradingMode::Income => Self::Income(IncomeStrategySet::new(config.income.clone())),
            TradingMode::Turbo => Self::Turbo(TurboStrategySet::new(config.turbo.clone())),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> TradingMode {
        match self {
            Self::Income(_) => TradingMode::Income,
            Self::Turbo(_) => TradingMode::Turbo,
        }
    }

    fn generator(&self) -> &dyn CandidateGenerator {
        match self {
            Self::Income(set) => set,
            Self::Turbo(set) => set,
        }
    }
}

impl CandidateGenerator for StrategySet {
    fn name(&self) -> &'static str {
        self.generator().name()
    }

    fn generate(&self, market: &MarketSnapshot, account: &AccountState) -> Vec<CandidateTrade> {
        self.generator().generate(market, account)
    }
}
