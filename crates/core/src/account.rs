use crate::error::PilotError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trading posture of the desk.
///
/// `Income` trades multi-day defined-risk structures on index ETFs, `Turbo`
/// trades same-day expirations on SPY only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Income,
    Turbo,
}

impl TradingMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Turbo => "turbo",
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradingMode {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "turbo" => Ok(Self::Turbo),
            other => Err(PilotError::InvalidRequest(format!(
                "unknown mode '{other}', expected income or turbo"
            ))),
        }
    }
}

/// Point-in-time copy of the account, produced by the ledger for reporting
/// and persistence. Never a live reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: Decimal,
    pub mode: TradingMode,
    /// Committed plus reserved risk as a fraction of balance.
    pub daily_risk_used_fraction: f64,
    /// Consecutive wins (positive) or losses (negative).
    pub streak: i32,
    pub today_pnl: Decimal,
    pub week_pnl: Decimal,
    pub trades_today: u32,
    /// Day the daily figures belong to. Absent in snapshots written before
    /// the day was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trading_day: Option<NaiveDate>,
}

impl AccountState {
    #[must_use]
    pub fn new(balance: Decimal, mode: TradingMode) -> Self {
        Self {
            balance,
            mode,
            daily_risk_used_fraction: 0.0,
            streak: 0,
            today_pnl: Decimal::ZERO,
            week_pnl: Decimal::ZERO,
            trades_today: 0,
            trading_day: None,
        }
    }
}

/// Active risk limits, replaced wholesale on a risk-level change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskBudget {
    pub daily_limit_fraction: f64,
    pub per_trade_limit_fraction: f64,
    pub circuit_breaker_move_pct: f64,
}

impl Default for RiskBudget {
    fn default() -> Self {
        Self {
            daily_limit_fraction: 0.06,
            per_trade_limit_fraction: 0.01,
            circuit_breaker_move_pct: 0.02,
        }
    }
}

impl RiskBudget {
    /// Builds a budget from user-supplied limits, keeping the breaker threshold.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRiskBudget` if the limits do not satisfy
    /// `0 < per_trade <= daily <= 1`.
    pub fn with_limits(&self, daily_limit: f64, per_trade_limit: f64) -> Result<Self, PilotError> {
        let budget = Self {
            daily_limit_fraction: daily_limit,
            per_trade_limit_fraction: per_trade_limit,
            circuit_breaker_move_pct: self.circuit_breaker_move_pct,
        };
        budget.validate()?;
        Ok(budget)
    }

    /// # Errors
    ///
    /// Returns `InvalidRiskBudget` describing the first violated bound.
    pub fn validate(&self) -> Result<(), PilotError> {
        let Self {
            daily_limit_fraction: daily,
            per_trade_limit_fraction: per_trade,
            circuit_breaker_move_pct: breaker,
        } = *self;

        if !daily.is_finite() || !per_trade.is_finite() || !breaker.is_finite() {
            return Err(PilotError::InvalidRiskBudget(
                "limits must be finite numbers".to_string(),
            ));
        }
        if per_trade <= 0.0 {
            return Err(PilotError::InvalidRiskBudget(format!(
                "per_trade_limit must be positive, got {per_trade}"
            )));
        }
        if per_trade > daily {
            return Err(PilotError::InvalidRiskBudget(format!(
                "per_trade_limit {per_trade} exceeds daily_limit {daily}"
            )));
        }
        if daily > 1.0 {
            return Err(PilotError::InvalidRiskBudget(format!(
                "daily_limit {daily} exceeds 1.0"
            )));
        }
        if breaker <= 0.0 {
            return Err(PilotError::InvalidRiskBudget(format!(
                "circuit_breaker_move_pct must be positive, got {breaker}"
            )));
        }
        Ok(())
    }
}
