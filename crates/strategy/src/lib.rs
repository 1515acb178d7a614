pub mod income;
pub mod mode;
pub mod strategy_set;
pub mod turbo;

pub use income::IncomeStrategySet;
pub use mode::{ModeController, ModeTransition};
pub use strategy_set::{CandidateGenerator, StrategySet};
pub use turbo::TurboStrategySet;
