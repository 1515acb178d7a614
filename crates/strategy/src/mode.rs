//! Guarded switching between income and turbo trading.

use crate::strategy_set::StrategySet;
use robopilot_core::{DeskEvent, PilotError, StrategiesConfig, TradingMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ModeTransition {
    /// Already in the requested mode.
    Unchanged { mode: TradingMode },
    Switched { from: TradingMode, to: TradingMode },
}

impl ModeTransition {
    #[must_use]
    pub const fn mode(&self) -> TradingMode {
        match self {
            Self::Unchanged { mode } => *mode,
            Self::Switched { to, .. } => *to,
        }
    }
}

/// Owns the trading mode and the strategy set that goes with it.
///
/// The mode only changes through [`ModeController::switch_mode`].
pub struct ModeController {
    active: Arc<StrategySet>,
    config: StrategiesConfig,
    events: broadcast::Sender<DeskEvent>,
}

impl ModeController {
    #[must_use]
    pub fn new(initial: TradingMode, config: StrategiesConfig, events: broadcast::Sender<DeskEvent>) -> Self {
        Self {
            active: Arc::new(StrategySet::for_mode(initial, &config)),
            config,
            events,
        }
    }

    #[must_use]
    pub fn mode(&self) -> TradingMode {
        self.active.mode()
    }

    /// Shared handle to the active set; stays valid across later switches.
    #[must_use]
    pub fn active_set(&self) -> Arc<StrategySet> {
        Arc::clone(&self.active)
    }

    /// Switches to `target` if nothing opened under another mode is still
    /// outstanding. `outstanding` yields the mode of every open position and
    /// every reserved order that has not filled or been released.
    ///
    /// # Errors
    ///
    /// Returns `ModeSwitchBlocked` when any of them belongs to another mode;
    /// the mode is unchanged.
    pub fn switch_mode<I>(&mut self, target: TradingMode, outstanding: I) -> Result<ModeTransition, PilotError>
    where
        I: IntoIterator<Item = TradingMode>,
    {
        let current = self.mode();
        if current == target {
            return Ok(ModeTransition::Unchanged { mode: current });
        }

        let blocking = outstanding.into_iter().filter(|mode| *mode != target).count();
        if blocking > 0 {
            return Err(PilotError::ModeSwitchBlocked {
                current,
                target,
                open_positions: blocking,
            });
        }

        self.active = Arc::new(StrategySet::for_mode(target, &self.config));
        info!(from = %current, to = %target, "Trading mode switched");
        let _ = self.events.send(DeskEvent::ModeChanged {
            from: current,
            to: target,
        });

        Ok(ModeTransition::Switched {
            from: current,
            to: target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy_set::CandidateGenerator;
    use robopilot_core::ReasonCode;

    fn controller(initial: TradingMode) -> (ModeController, broadcast::Receiver<DeskEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (ModeController::new(initial, StrategiesConfig::default(), tx), rx)
    }

    #[test]
    fn test_switch_to_current_mode_is_noop() {
        let (mut modes, mut rx) = controller(TradingMode::Income);
        let before = modes.active_set();

        let transition = modes.switch_mode(TradingMode::Income, []).unwrap();
        assert_eq!(transition, ModeTransition::Unchanged { mode: TradingMode::Income });
        assert!(Arc::ptr_eq(&before, &modes.active_set()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_open_income_position_blocks_turbo() {
        let (mut modes, _rx) = controller(TradingMode::Income);
        let err = modes
            .switch_mode(TradingMode::Turbo, [TradingMode::Income])
            .unwrap_err();
        assert_eq!(err.code(), ReasonCode::ModeSwitchBlocked);
        assert_eq!(modes.mode(), TradingMode::Income);
    }

    #[test]
    fn test_switch_swaps_strategy_set_and_emits_event() {
        let (mut modes, mut rx) = controller(TradingMode::Income);
        let old_set = modes.active_set();

        let transition = modes.switch_mode(TradingMode::Turbo, []).unwrap();
        assert_eq!(
            transition,
            ModeTransition::Switched {
                from: TradingMode::Income,
                to: TradingMode::Turbo
            }
        );
        assert_eq!(modes.mode(), TradingMode::Turbo);
        assert_eq!(modes.active_set().name(), "turbo");
        // holders of the old set keep a consistent view
        assert_eq!(old_set.mode(), TradingMode::Income);

        assert_eq!(
            rx.try_recv().unwrap(),
            DeskEvent::ModeChanged {
                from: TradingMode::Income,
                to: TradingMode::Turbo
            }
        );
    }

    #[test]
    fn test_positions_from_target_mode_do_not_block() {
        let (mut modes, _rx) = controller(TradingMode::Turbo);
        assert!(modes
            .switch_mode(TradingMode::Income, [TradingMode::Income, TradingMode::Income])
            .is_ok());
    }
}
