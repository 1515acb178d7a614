//! Composite admission gate.
//!
//! Checks run in a fixed order and short-circuit on the first failure:
//! circuit breaker, daily budget, edge, then per-trade sizing.

use crate::circuit_breaker::{BreakerDecision, CircuitBreaker};
use crate::edge_filter::EdgeFilter;
use crate::ledger::USAGE_EPSILON;
use robopilot_core::{
    AccountState, CandidateTrade, MarketSignal, PositionSizer, RejectReason, RiskBudget,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Admission decision for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Admission {
    /// Final clamped size as a fraction of balance.
    Admitted(f64),
    Rejected(RejectReason),
}

impl Admission {
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }
}

#[derive(Debug, Clone)]
pub struct RiskFence {
    edge_filter: EdgeFilter,
    sizer: PositionSizer,
    min_edge: f64,
}

impl Default for RiskFence {
    fn default() -> Self {
        Self::new(EdgeFilter::default(), PositionSizer::default(), 0.55)
    }
}

impl RiskFence {
    #[must_use]
    pub const fn new(edge_filter: EdgeFilter, sizer: PositionSizer, min_edge: f64) -> Self {
        Self {
            edge_filter,
            sizer,
            min_edge,
        }
    }

    #[must_use]
    pub const fn min_edge(&self) -> f64 {
        self.min_edge
    }

    /// Decides whether `candidate` may trade.
    ///
    /// Deterministic for identical inputs. The caller must reserve the
    /// admitted size against the ledger under the same lock that produced
    /// `account`.
    #[must_use]
    pub fn admit(
        &self,
        candidate: &CandidateTrade,
        account: &AccountState,
        budget: &RiskBudget,
        market: &MarketSignal,
    ) -> Admission {
        match self.check(candidate, account, budget, market) {
            Ok(size) => Admission::Admitted(size),
            Err(reason) => {
                debug!(
                    symbol = %candidate.symbol,
                    strategy = %candidate.strategy_id,
                    reason = %reason,
                    "Candidate rejected"
                );
                Admission::Rejected(reason)
            }
        }
    }

    fn check(
        &self,
        candidate: &CandidateTrade,
        account: &AccountState,
        budget: &RiskBudget,
        market: &MarketSignal,
    ) -> Result<f64, RejectReason> {
        let used = account.daily_risk_used_fraction;
        let limit = budget.daily_limit_fraction;
        let fits = |risk: f64| used + risk <= limit + USAGE_EPSILON;

        if let BreakerDecision::Blocked(cause) = CircuitBreaker::from_budget(budget).evaluate_signal(market) {
            return Err(RejectReason::CircuitBreakerTripped { cause });
        }

        // A NaN estimate must not slip through the comparison.
        if !candidate.estimated_risk.is_finite() || !fits(candidate.estimated_risk) {
            return Err(RejectReason::DailyLimitExceeded {
                used,
                requested: candidate.estimated_risk,
                limit,
            });
        }

        if let Some(reason) = self
            .edge_filter
            .evaluate(candidate, self.min_edge)
            .into_rejection(self.min_edge)
        {
            return Err(reason);
        }

        let sized = self.sizer.size(account, budget);
        if !sized.is_finite() || sized > budget.per_trade_limit_fraction {
            return Err(RejectReason::PerTradeLimitExceeded {
                sized,
                limit: budget.per_trade_limit_fraction,
            });
        }
        // The reservation is the sized amount, so it must fit too.
        if !fits(sized) {
            return Err(RejectReason::DailyLimitExceeded {
                used,
                requested: sized,
                limit,
            });
        }

        Ok(sized)
    }
}
