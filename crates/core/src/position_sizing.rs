use crate::account::{AccountState, RiskBudget};
use serde::{Deserialize, Serialize};

/// Streak-driven size adjustment ("turbo compound").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Wins in a row before size starts scaling up.
    pub win_streak_threshold: u32,
    /// Multiplier added per win, times the streak length.
    pub win_step: f64,
    pub max_win_multiplier: f64,
    /// Losses in a row before size starts scaling down.
    pub loss_streak_threshold: u32,
    pub loss_step: f64,
    pub min_loss_multiplier: f64,
    /// Smallest allowed size, relative to the base size.
    pub floor_ratio: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            win_streak_threshold: 3,
            win_step: 0.1,
            max_win_multiplier: 1.5,
            loss_streak_threshold: 2,
            loss_step: 0.15,
            min_loss_multiplier: 0.5,
            floor_ratio: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    #[must_use]
    pub const fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Multiplier applied to the base size for a given streak.
    #[must_use]
    pub fn multiplier(&self, streak: i32) -> f64 {
        let cfg = &self.config;
        let len = f64::from(streak.unsigned_abs());

        if streak > 0 && streak.unsigned_abs() >= cfg.win_streak_threshold {
            (1.0 + cfg.win_step * len).min(cfg.max_win_multiplier)
        } else if streak < 0 && streak.unsigned_abs() >= cfg.loss_streak_threshold {
            (1.0 - cfg.loss_step * len).max(cfg.min_loss_multiplier)
        } else {
            1.0
        }
    }

    /// Size of the next trade as a fraction of balance.
    ///
    /// Always within `[floor_ratio * base, per_trade_limit]`, whatever the streak.
    #[must_use]
    pub fn size(&self, account: &AccountState, budget: &RiskBudget) -> f64 {
        let base = budget.per_trade_limit_fraction;
        let raw = base * self.multiplier(account.streak);
        let floor = base * self.config.floor_ratio;

        raw.max(floor).min(budget.per_trade_limit_fraction)
    }
}
