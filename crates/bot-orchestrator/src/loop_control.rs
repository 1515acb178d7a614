//! Shared loop state that outlives any one loop task.
//!
//! The control surface and the watchdog act on this directly, so pause and
//! halt keep working even when the loop task itself is hung.

use crate::commands::{HaltReason, LoopState, Transition};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use robopilot_core::{PilotError, ReasonCode, RejectReason};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub at: DateTime<Utc>,
    pub symbol: String,
    pub strategy_id: String,
    pub reason: ReasonCode,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopStats {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub broker_failures: u64,
    pub rejections: BTreeMap<ReasonCode, u64>,
    pub last_rejection: Option<RejectionRecord>,
}

#[derive(Debug)]
struct ControlState {
    state: LoopState,
    halt_reason: Option<HaltReason>,
    halted_at: Option<DateTime<Utc>>,
    stats: LoopStats,
}

#[derive(Debug)]
pub struct LoopControl {
    inner: RwLock<ControlState>,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new(LoopState::Running)
    }
}

impl LoopControl {
    #[must_use]
    pub fn new(initial: LoopState) -> Self {
        Self {
            inner: RwLock::new(ControlState {
                state: initial,
                halt_reason: None,
                halted_at: None,
                stats: LoopStats::default(),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        self.inner.read().state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.state() == LoopState::Halted
    }

    #[must_use]
    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.inner.read().halt_reason
    }

    #[must_use]
    pub fn halted_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().halted_at
    }

    /// Stops new candidates. Idempotent while paused.
    ///
    /// # Errors
    ///
    /// Returns `TradingHalted` once the loop is halted.
    pub fn pause(&self) -> Result<Transition, PilotError> {
        let mut inner = self.inner.write();
        match inner.state {
            LoopState::Halted => Err(PilotError::TradingHalted),
            LoopState::Paused => Ok(Transition {
                state: LoopState::Paused,
                changed: false,
            }),
            LoopState::Running => {
                inner.state = LoopState::Paused;
                info!("Trading loop paused");
                Ok(Transition {
                    state: LoopState::Paused,
                    changed: true,
                })
            }
        }
    }

    /// # Errors
    ///
    /// Returns `TradingHalted` once the loop is halted.
    pub fn resume(&self) -> Result<Transition, PilotError> {
        let mut inner = self.inner.write();
        match inner.state {
            LoopState::Halted => Err(PilotError::TradingHalted),
            LoopState::Running => Ok(Transition {
                state: LoopState::Running,
                changed: false,
            }),
            LoopState::Paused => {
                inner.state = LoopState::Running;
                info!("Trading loop resumed");
                Ok(Transition {
                    state: LoopState::Running,
                    changed: true,
                })
            }
        }
    }

    /// Enters `Halted`. Returns `true` only for the call that made the
    /// transition; the first reason is kept.
    pub fn halt(&self, reason: HaltReason) -> bool {
        let mut inner = self.inner.write();
        if inner.state == LoopState::Halted {
            return false;
        }
        inner.state = LoopState::Halted;
        inner.halt_reason = Some(reason);
        inner.halted_at = Some(Utc::now());

        match reason.fatal_code() {
            Some(code) => error!(reason = %reason, code = %code, "Trading loop HALTED on fatal error"),
            None => warn!(reason = %reason, "Trading loop halted"),
        }
        true
    }

    pub fn record_tick(&self, at: DateTime<Utc>, skipped: bool) {
        let mut inner = self.inner.write();
        inner.stats.ticks += 1;
        if skipped {
            inner.stats.skipped_ticks += 1;
        }
        inner.stats.last_tick_at = Some(at);
    }

    pub fn record_rejection(&self, at: DateTime<Utc>, symbol: &str, strategy_id: &str, reason: &RejectReason) {
        let mut inner = self.inner.write();
        *inner.stats.rejections.entry(reason.code()).or_insert(0) += 1;
        inner.stats.last_rejection = Some(RejectionRecord {
            at,
            symbol: symbol.to_string(),
            strategy_id: strategy_id.to_string(),
            reason: reason.code(),
            detail: reason.to_string(),
        });
    }

    pub fn record_broker_failure(&self) {
        self.inner.write().stats.broker_failures += 1;
    }

    #[must_use]
    pub fn stats(&self) -> LoopStats {
        self.inner.read().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_pause_is_idempotent() {
        let control = LoopControl::default();

        let first = control.pause().unwrap();
        assert!(first.changed);
        let second = control.pause().unwrap();
        assert!(!second.changed);
        assert_eq!(second.state, LoopState::Paused);
        assert_eq!(control.state(), LoopState::Paused);
    }

    #[test]
    fn test_resume_from_running_is_noop() {
        let control = LoopControl::default();
        let t = control.resume().unwrap();
        assert_eq!(t, Transition { state: LoopState::Running, changed: false });
    }

    #[test]
    fn test_halt_is_terminal() {
        let control = LoopControl::default();
        control.pause().unwrap();

        assert!(control.halt(HaltReason::EmergencyExit));
        assert!(!control.halt(HaltReason::BudgetExceeded));
        assert_eq!(control.halt_reason(), Some(HaltReason::EmergencyExit));

        assert_eq!(control.resume(), Err(PilotError::TradingHalted));
        assert_eq!(control.pause(), Err(PilotError::TradingHalted));
        assert!(control.is_halted());
    }

    #[test]
    fn test_rejections_are_counted_by_code() {
        let control = LoopControl::default();
        let reason = RejectReason::EdgeTooLow {
            score: Some(0.4),
            min_edge: 0.55,
            detail: "low".to_string(),
        };
        control.record_rejection(Utc::now(), "SPY", "credit_spread_3dte", &reason);
        control.record_rejection(Utc::now(), "QQQ", "credit_spread_3dte", &reason);

        let stats = control.stats();
        assert_eq!(stats.rejections.get(&ReasonCode::EdgeTooLow), Some(&2));
        assert_eq!(stats.last_rejection.unwrap().symbol, "QQQ");
    }
}
