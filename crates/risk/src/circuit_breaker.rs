//! Market-wide halt trigger.
//!
//! Blocks new admissions when the broad market has moved more than the
//! configured threshold, or when news is pending for the candidate's symbol.
//! Stateless: every decision is a pure function of its inputs and the threshold.
//!
//! # Example
//!
//! ```
//! use robopilot_risk::circuit_breaker::{BreakerDecision, CircuitBreaker};
//!
//! let breaker = CircuitBreaker::new(0.02);
//! assert_eq!(breaker.evaluate(0.02, false), BreakerDecision::Allowed);
//! assert!(breaker.evaluate(0.025, false).is_blocked());
//! ```

use robopilot_core::{BreakerCause, MarketSignal, RiskBudget};
use serde::{Deserialize, Serialize};

// =============================================================================
// Decision
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BreakerDecision {
    Allowed,
    Blocked(BreakerCause),
}

impl BreakerDecision {
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

// =============================================================================
// Circuit Breaker
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreaker {
    move_threshold: f64,
}

impl CircuitBreaker {
    /// Creates a breaker tripping on moves strictly above `move_threshold`.
    #[must_use]
    pub const fn new(move_threshold: f64) -> Self {
        Self { move_threshold }
    }

    #[must_use]
    pub const fn from_budget(budget: &RiskBudget) -> Self {
        Self::new(budget.circuit_breaker_move_pct)
    }

    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.move_threshold
    }

    /// A move exactly at the threshold is allowed. An unreadable (NaN) move blocks.
    #[must_use]
    pub fn evaluate(&self, market_move_abs_pct: f64, news_flag: bool) -> BreakerDecision {
        let move_pct = market_move_abs_pct.abs();

        if move_pct.is_nan() || move_pct > self.move_threshold {
            return BreakerDecision::Blocked(BreakerCause::MarketMove {
                move_pct,
                threshold: self.move_threshold,
            });
        }
        if news_flag {
            return BreakerDecision::Blocked(BreakerCause::News);
        }
        BreakerDecision::Allowed
    }

    #[must_use]
    pub fn evaluate_signal(&self, signal: &MarketSignal) -> BreakerDecision {
        self.evaluate(signal.market_move_abs_pct, signal.news_flag)
    }
}
