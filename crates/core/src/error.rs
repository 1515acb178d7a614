//! Error taxonomy shared by every layer of the desk.
//!
//! Each error maps to a stable [`ReasonCode`] whose serialized form is what the
//! control surface returns to callers.

use crate::account::TradingMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stable, machine-readable reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReasonCode {
    CircuitBreakerTripped,
    DailyLimitExceeded,
    PerTradeLimitExceeded,
    EdgeTooLow,
    ModeSwitchBlocked,
    BudgetExceeded,
    BrokerUnavailable,
    WatchdogFailoverExhausted,
    TradingHalted,
    InvalidRiskBudget,
    InvalidRequest,
}

impl ReasonCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CircuitBreakerTripped => "CircuitBreakerTripped",
            Self::DailyLimitExceeded => "DailyLimitExceeded",
            Self::PerTradeLimitExceeded => "PerTradeLimitExceeded",
            Self::EdgeTooLow => "EdgeTooLow",
            Self::ModeSwitchBlocked => "ModeSwitchBlocked",
            Self::BudgetExceeded => "BudgetExceeded",
            Self::BrokerUnavailable => "BrokerUnavailable",
            Self::WatchdogFailoverExhausted => "WatchdogFailoverExhausted",
            Self::TradingHalted => "TradingHalted",
            Self::InvalidRiskBudget => "InvalidRiskBudget",
            Self::InvalidRequest => "InvalidRequest",
        }
    }

    /// Fatal codes force the loop into `Halted` and are never retried.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::BudgetExceeded | Self::WatchdogFailoverExhausted)
    }

    /// Admission rejections: expected, non-fatal, counted in stats.
    #[must_use]
    pub const fn is_rejection(self) -> bool {
        matches!(
            self,
            Self::CircuitBreakerTripped
                | Self::DailyLimitExceeded
                | Self::PerTradeLimitExceeded
                | Self::EdgeTooLow
        )
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the circuit breaker blocked a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BreakerCause {
    MarketMove { move_pct: f64, threshold: f64 },
    News,
}

impl fmt::Display for BreakerCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarketMove { move_pct, threshold } => {
                write!(f, "market move {move_pct:.4} above threshold {threshold:.4}")
            }
            Self::News => f.write_str("news flag set"),
        }
    }
}

/// Admission rejections produced by the risk fence.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "reason")]
pub enum RejectReason {
    #[error("circuit breaker tripped: {cause}")]
    CircuitBreakerTripped { cause: BreakerCause },

    #[error("daily limit exceeded: used {used:.4} + requested {requested:.4} > limit {limit:.4}")]
    DailyLimitExceeded { used: f64, requested: f64, limit: f64 },

    #[error("edge too low: {detail}")]
    EdgeTooLow {
        score: Option<f64>,
        min_edge: f64,
        detail: String,
    },

    #[error("per-trade limit exceeded: sized {sized:.4} > limit {limit:.4}")]
    PerTradeLimitExceeded { sized: f64, limit: f64 },
}

impl RejectReason {
    #[must_use]
    pub const fn code(&self) -> ReasonCode {
        match self {
            Self::CircuitBreakerTripped { .. } => ReasonCode::CircuitBreakerTripped,
            Self::DailyLimitExceeded { .. } => ReasonCode::DailyLimitExceeded,
            Self::EdgeTooLow { .. } => ReasonCode::EdgeTooLow,
            Self::PerTradeLimitExceeded { .. } => ReasonCode::PerTradeLimitExceeded,
        }
    }
}

/// Failures talking to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker call timed out after {0:?}")]
    Timeout(Duration),

    #[error("order rejected by broker: {0}")]
    Rejected(String),
}

impl BrokerError {
    /// Transport-level failures are retried; broker rejections are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Top-level error for desk operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PilotError {
    #[error(transparent)]
    Rejected(#[from] RejectReason),

    #[error("cannot switch from {current} to {target}: {open_positions} position(s) or pending order(s) from {current} still outstanding")]
    ModeSwitchBlocked {
        current: TradingMode,
        target: TradingMode,
        open_positions: usize,
    },

    #[error("ledger overflow: committing {attempted:.4} on top of {used:.4} would exceed 1.0")]
    BudgetExceeded { used: f64, attempted: f64 },

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("watchdog failover exhausted after {attempts} restart attempt(s)")]
    WatchdogFailoverExhausted { attempts: u32 },

    #[error("trading is halted")]
    TradingHalted,

    #[error("invalid risk budget: {0}")]
    InvalidRiskBudget(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl PilotError {
    #[must_use]
    pub const fn code(&self) -> ReasonCode {
        match self {
            Self::Rejected(reason) => reason.code(),
            Self::ModeSwitchBlocked { .. } => ReasonCode::ModeSwitchBlocked,
            Self::BudgetExceeded { .. } => ReasonCode::BudgetExceeded,
            Self::Broker(_) => ReasonCode::BrokerUnavailable,
            Self::WatchdogFailoverExhausted { .. } => ReasonCode::WatchdogFailoverExhausted,
            Self::TradingHalted => ReasonCode::TradingHalted,
            Self::InvalidRiskBudget(_) => ReasonCode::InvalidRiskBudget,
            Self::InvalidRequest(_) => ReasonCode::InvalidRequest,
        }
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.code().is_fatal()
    }
}
