//! Shared account, mode and position state.
//!
//! Everything that must change together lives in one [`Book`] behind one
//! lock: admitting a candidate and reserving its risk happen in the same
//! critical section, so two concurrent admissions cannot both spend the last
//! slice of the daily budget. Broker I/O never happens under the lock.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use robopilot_core::{
    AccountState, BrokerEvent, CandidateTrade, DeskEvent, Fill, MarketSignal, OrderRequest,
    PilotError, Position, RiskBudget, TradingMode,
};
use robopilot_risk::{Admission, DailyArchive, LedgerEntry, RiskFence, RiskLedger};
use robopilot_strategy::{ModeController, ModeTransition, StrategySet};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Risk held for an admitted candidate until its order fills or fails.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub trade_id: Uuid,
    pub candidate: CandidateTrade,
    pub mode: TradingMode,
    pub size_fraction: f64,
    pub notional: Decimal,
}

impl Reservation {
    #[must_use]
    pub fn order(&self, timestamp: DateTime<Utc>) -> OrderRequest {
        OrderRequest {
            trade_id: self.trade_id,
            symbol: self.candidate.symbol.clone(),
            strategy_id: self.candidate.strategy_id.clone(),
            mode: self.mode,
            size_fraction: self.size_fraction,
            notional: self.notional,
            timestamp,
        }
    }
}

struct Book {
    ledger: RiskLedger,
    modes: ModeController,
    positions: HashMap<Uuid, Position>,
    /// Mode of every reservation not yet filled or released.
    pending: HashMap<Uuid, TradingMode>,
}

pub struct Desk {
    book: Mutex<Book>,
    budget: RwLock<RiskBudget>,
    fence: RiskFence,
    events: broadcast::Sender<DeskEvent>,
    weekly_loss_limit: Option<f64>,
}

impl Desk {
    /// `modes` must publish on the same channel as `events`.
    #[must_use]
    pub fn new(
        ledger: RiskLedger,
        modes: ModeController,
        budget: RiskBudget,
        fence: RiskFence,
        events: broadcast::Sender<DeskEvent>,
    ) -> Self {
        Self {
            book: Mutex::new(Book {
                ledger,
                modes,
                positions: HashMap::new(),
                pending: HashMap::new(),
            }),
            budget: RwLock::new(budget),
            fence,
            events,
            weekly_loss_limit: None,
        }
    }

    /// Stops new entries once the week's realized loss reaches `fraction`
    /// of the balance. See [`Desk::weekly_loss_limit_hit`].
    #[must_use]
    pub fn with_weekly_loss_limit(mut self, fraction: f64) -> Self {
        self.weekly_loss_limit = Some(fraction);
        self
    }

    /// Whether realized losses this week have reached the weekly limit.
    /// Cleared by [`Desk::reset_weekly`].
    #[must_use]
    pub fn weekly_loss_limit_hit(&self) -> bool {
        let Some(limit) = self.weekly_loss_limit else {
            return false;
        };
        let account = self.snapshot();
        account.week_pnl < Decimal::ZERO && -account.week_pnl >= account.balance * fraction(limit)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeskEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: DeskEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Runs the risk fence and, on admission, reserves the sized risk
    /// atomically with respect to every other admission.
    ///
    /// `generated_by` is the mode of the strategy set that produced the
    /// candidate; candidates from a set that has since been swapped out are
    /// refused.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` for admission rejections, `InvalidRequest` for a
    /// stale candidate, and `BudgetExceeded` if the ledger refuses the
    /// reservation.
    pub fn admit_and_reserve(
        &self,
        candidate: CandidateTrade,
        generated_by: TradingMode,
        market: &MarketSignal,
    ) -> Result<Reservation, PilotError> {
        let budget = *self.budget.read();
        let mut book = self.book.lock();

        let mode = book.modes.mode();
        if mode != generated_by {
            return Err(PilotError::InvalidRequest(format!(
                "candidate from {generated_by} strategies while desk is in {mode}"
            )));
        }

        let account = book.ledger.snapshot(mode);
        let size_fraction = match self.fence.admit(&candidate, &account, &budget, market) {
            Admission::Admitted(size) => size,
            Admission::Rejected(reason) => {
                self.emit(DeskEvent::Rejected {
                    symbol: candidate.symbol.clone(),
                    strategy_id: candidate.strategy_id.clone(),
                    reason: reason.code(),
                });
                return Err(reason.into());
            }
        };

        let trade_id = Uuid::new_v4();
        book.ledger.reserve(trade_id, &candidate.symbol, size_fraction)?;
        book.pending.insert(trade_id, mode);
        let notional = (account.balance * fraction(size_fraction)).round_dp(2);
        drop(book);

        debug!(
            %trade_id,
            symbol = %candidate.symbol,
            strategy = %candidate.strategy_id,
            size_fraction,
            %notional,
            "Candidate admitted, risk reserved"
        );
        self.emit(DeskEvent::Admitted {
            trade_id,
            symbol: candidate.symbol.clone(),
            strategy_id: candidate.strategy_id.clone(),
            size_fraction,
        });

        Ok(Reservation {
            trade_id,
            candidate,
            mode,
            size_fraction,
            notional,
        })
    }

    /// Commits the reserved risk and opens the position.
    ///
    /// # Errors
    ///
    /// Returns `BudgetExceeded` if the ledger refuses the commit.
    pub fn confirm_fill(&self, reservation: &Reservation, fill: &Fill) -> Result<Position, PilotError> {
        let position = Position {
            id: reservation.trade_id,
            symbol: reservation.candidate.symbol.clone(),
            strategy_id: reservation.candidate.strategy_id.clone(),
            mode: reservation.mode,
            open_timestamp: fill.filled_at,
            basis: fill.basis,
            current_mark_pnl: Decimal::ZERO,
            pct_of_balance: reservation.size_fraction,
        };

        {
            let mut book = self.book.lock();
            book.ledger.record_fill(
                reservation.trade_id,
                &reservation.candidate.symbol,
                reservation.size_fraction,
            )?;
            book.pending.remove(&reservation.trade_id);
            book.positions.insert(position.id, position.clone());
        }

        info!(
            position_id = %position.id,
            symbol = %position.symbol,
            strategy = %position.strategy_id,
            basis = %position.basis,
            "Position opened"
        );
        self.emit(DeskEvent::Filled {
            position: position.clone(),
        });
        Ok(position)
    }

    /// Gives reserved risk back after a failed submission.
    pub fn release(&self, reservation: &Reservation) {
        let released = {
            let mut book = self.book.lock();
            book.pending.remove(&reservation.trade_id);
            book.ledger.release(reservation.trade_id)
        };
        if released.is_some() {
            self.emit(DeskEvent::Released {
                trade_id: reservation.trade_id,
                symbol: reservation.candidate.symbol.clone(),
            });
        }
    }

    pub fn apply_broker_event(&self, event: &BrokerEvent) {
        match event {
            BrokerEvent::Mark {
                position_id,
                mark_pnl,
            } => {
                if let Some(position) = self.book.lock().positions.get_mut(position_id) {
                    position.mark(*mark_pnl);
                }
            }
            BrokerEvent::Closed(report) => {
                self.close_position(report.position_id, report.realized_pnl);
            }
        }
    }

    /// Removes a position and books its realized P&L.
    pub fn close_position(&self, position_id: Uuid, realized_pnl: Decimal) -> Option<Position> {
        let position = {
            let mut book = self.book.lock();
            let position = book.positions.remove(&position_id)?;
            book.ledger.record_close(position_id, &position.symbol, realized_pnl);
            position
        };

        info!(
            %position_id,
            symbol = %position.symbol,
            %realized_pnl,
            "Position closed"
        );
        self.emit(DeskEvent::PositionClosed {
            position_id,
            symbol: position.symbol.clone(),
            realized_pnl,
        });
        Some(position)
    }

    /// Reloads positions persisted before a restart.
    pub fn restore_positions(&self, positions: impl IntoIterator<Item = Position>) {
        let mut book = self.book.lock();
        for position in positions {
            book.positions.insert(position.id, position);
        }
    }

    /// Open positions, oldest first.
    #[must_use]
    pub fn open_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.book.lock().positions.values().cloned().collect();
        positions.sort_by_key(|p| p.open_timestamp);
        positions
    }

    /// # Errors
    ///
    /// Returns `ModeSwitchBlocked` while positions or reserved orders from
    /// the current mode are outstanding.
    pub fn switch_mode(&self, target: TradingMode) -> Result<ModeTransition, PilotError> {
        let mut guard = self.book.lock();
        let book = &mut *guard;
        let outstanding = book
            .positions
            .values()
            .map(|p| p.mode)
            .chain(book.pending.values().copied());
        let result = book.modes.switch_mode(target, outstanding);
        if let Err(e) = &result {
            warn!(error = %e, "Mode switch refused");
        }
        result
    }

    #[must_use]
    pub fn mode(&self) -> TradingMode {
        self.book.lock().modes.mode()
    }

    #[must_use]
    pub fn active_strategies(&self) -> Arc<StrategySet> {
        self.book.lock().modes.active_set()
    }

    #[must_use]
    pub fn budget(&self) -> RiskBudget {
        *self.budget.read()
    }

    /// Swaps in new limits, keeping the breaker threshold. Risk already
    /// reserved is untouched; the next admission sees the new limits.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRiskBudget` for limits outside `0 < per_trade <= daily <= 1`.
    pub fn update_budget(&self, daily_limit: f64, per_trade_limit: f64) -> Result<RiskBudget, PilotError> {
        let current = self.budget();
        let updated = current.with_limits(daily_limit, per_trade_limit)?;
        self.replace_budget(updated)?;
        Ok(updated)
    }

    /// # Errors
    ///
    /// Returns `InvalidRiskBudget` if `budget` fails validation.
    pub fn replace_budget(&self, budget: RiskBudget) -> Result<(), PilotError> {
        budget.validate()?;
        {
            let mut current = self.budget.write();
            if *current == budget {
                return Ok(());
            }
            *current = budget;
        }
        info!(
            daily_limit = budget.daily_limit_fraction,
            per_trade_limit = budget.per_trade_limit_fraction,
            breaker = budget.circuit_breaker_move_pct,
            "Risk budget updated"
        );
        self.emit(DeskEvent::RiskBudgetUpdated { budget });
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> AccountState {
        let book = self.book.lock();
        book.ledger.snapshot(book.modes.mode())
    }

    #[must_use]
    pub fn trading_day(&self) -> NaiveDate {
        self.book.lock().ledger.trading_day()
    }

    pub fn reset_daily(&self, day: NaiveDate) -> DailyArchive {
        let archive = self.book.lock().ledger.reset_daily(day);
        self.emit(DeskEvent::DailyReset { day });
        archive
    }

    pub fn reset_weekly(&self) {
        self.book.lock().ledger.reset_weekly();
    }

    /// Today's ledger entries.
    #[must_use]
    pub fn journal(&self) -> Vec<LedgerEntry> {
        self.book.lock().ledger.log().to_vec()
    }

    pub(crate) fn emit_halt(&self, reason: &str) {
        self.emit(DeskEvent::Halted {
            reason: reason.to_string(),
        });
    }
}

fn fraction(value: f64) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use robopilot_core::{ReasonCode, StrategiesConfig};
    use rust_decimal_macros::dec;
    use std::thread;

    fn desk_with(mode: TradingMode, budget: RiskBudget) -> Desk {
        let (tx, _) = broadcast::channel(64);
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        Desk::new(
            RiskLedger::new(dec!(5000), day),
            ModeController::new(mode, StrategiesConfig::default(), tx.clone()),
            budget,
            RiskFence::default(),
            tx,
        )
    }

    fn candidate(symbol: &str, risk: f64) -> CandidateTrade {
        CandidateTrade {
            strategy_id: "credit_spread_3dte".to_string(),
            symbol: symbol.to_string(),
            proposed_size: risk,
            edge_score: 0.7,
            estimated_risk: risk,
        }
    }

    fn fill_for(reservation: &Reservation) -> Fill {
        Fill {
            trade_id: reservation.trade_id,
            symbol: reservation.candidate.symbol.clone(),
            basis: reservation.notional,
            filled_at: Utc::now(),
        }
    }

    #[test]
    fn test_admission_reserves_and_fill_opens_position() {
        let desk = desk_with(TradingMode::Income, RiskBudget::default());
        let mut events = desk.subscribe();

        let reservation = desk
            .admit_and_reserve(candidate("SPY", 0.015), TradingMode::Income, &MarketSignal::default())
            .unwrap();
        assert!((reservation.size_fraction - 0.01).abs() < 1e-12);
        assert_eq!(reservation.notional, dec!(50));
        assert!((desk.snapshot().daily_risk_used_fraction - 0.01).abs() < 1e-12);

        let position = desk.confirm_fill(&reservation, &fill_for(&reservation)).unwrap();
        assert_eq!(position.mode, TradingMode::Income);
        assert_eq!(desk.open_positions().len(), 1);
        assert_eq!(desk.snapshot().trades_today, 1);

        assert!(matches!(events.try_recv().unwrap(), DeskEvent::Admitted { .. }));
        assert!(matches!(events.try_recv().unwrap(), DeskEvent::Filled { .. }));
    }

    #[test]
    fn test_release_returns_budget() {
        let desk = desk_with(TradingMode::Income, RiskBudget::default());
        let reservation = desk
            .admit_and_reserve(candidate("SPY", 0.01), TradingMode::Income, &MarketSignal::default())
            .unwrap();

        desk.release(&reservation);
        assert_eq!(desk.snapshot().daily_risk_used_fraction, 0.0);
    }

    #[test]
    fn test_stale_candidate_refused() {
        let desk = desk_with(TradingMode::Turbo, RiskBudget::default());
        let err = desk
            .admit_and_reserve(candidate("SPY", 0.01), TradingMode::Income, &MarketSignal::default())
            .unwrap_err();
        assert_eq!(err.code(), ReasonCode::InvalidRequest);
    }

    #[test]
    fn test_rejection_is_typed_and_has_no_side_effect() {
        let desk = desk_with(TradingMode::Income, RiskBudget::default());
        let market = MarketSignal {
            market_move_abs_pct: 0.05,
            news_flag: false,
        };
        let err = desk
            .admit_and_reserve(candidate("SPY", 0.01), TradingMode::Income, &market)
            .unwrap_err();
        assert_eq!(err.code(), ReasonCode::CircuitBreakerTripped);
        assert_eq!(desk.snapshot().daily_risk_used_fraction, 0.0);
    }

    #[test]
    fn test_concurrent_admissions_never_overshoot_daily_limit() {
        // room for exactly three 0.01 trades
        let budget = RiskBudget {
            daily_limit_fraction: 0.03,
            ..RiskBudget::default()
        };
        let desk = Arc::new(desk_with(TradingMode::Income, budget));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let desk = Arc::clone(&desk);
                thread::spawn(move || {
                    desk.admit_and_reserve(
                        candidate(&format!("SYM{i}"), 0.01),
                        TradingMode::Income,
                        &MarketSignal::default(),
                    )
                    .is_ok()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 3);
        assert!(desk.snapshot().daily_risk_used_fraction <= 0.03 + 1e-12);
    }

    #[test]
    fn test_default_budget_fits_six_full_size_trades() {
        let desk = desk_with(TradingMode::Income, RiskBudget::default());

        for i in 0..6 {
            let reservation = desk
                .admit_and_reserve(candidate(&format!("SYM{i}"), 0.01), TradingMode::Income, &MarketSignal::default())
                .unwrap();
            desk.confirm_fill(&reservation, &fill_for(&reservation)).unwrap();
        }
        assert_eq!(desk.snapshot().trades_today, 6);

        let err = desk
            .admit_and_reserve(candidate("SYM6", 0.01), TradingMode::Income, &MarketSignal::default())
            .unwrap_err();
        assert_eq!(err.code(), ReasonCode::DailyLimitExceeded);
    }

    #[test]
    fn test_budget_update_applies_to_next_admission_only() {
        let desk = desk_with(TradingMode::Income, RiskBudget::default());
        desk.admit_and_reserve(candidate("SPY", 0.01), TradingMode::Income, &MarketSignal::default())
            .unwrap();
        desk.admit_and_reserve(candidate("QQQ", 0.01), TradingMode::Income, &MarketSignal::default())
            .unwrap();

        // tighten below what is already reserved
        let budget = desk.update_budget(0.015, 0.005).unwrap();
        assert!((budget.daily_limit_fraction - 0.015).abs() < 1e-12);
        assert!((desk.snapshot().daily_risk_used_fraction - 0.02).abs() < 1e-12);

        let err = desk
            .admit_and_reserve(candidate("IWM", 0.005), TradingMode::Income, &MarketSignal::default())
            .unwrap_err();
        assert_eq!(err.code(), ReasonCode::DailyLimitExceeded);
    }

    #[test]
    fn test_invalid_budget_update_keeps_previous() {
        let desk = desk_with(TradingMode::Income, RiskBudget::default());
        let err = desk.update_budget(0.01, 0.05).unwrap_err();
        assert_eq!(err.code(), ReasonCode::InvalidRiskBudget);
        assert_eq!(desk.budget(), RiskBudget::default());
    }

    #[test]
    fn test_mode_switch_blocked_by_open_income_position() {
        let desk = desk_with(TradingMode::Income, RiskBudget::default());
        let reservation = desk
            .admit_and_reserve(candidate("SPY", 0.01), TradingMode::Income, &MarketSignal::default())
            .unwrap();
        desk.confirm_fill(&reservation, &fill_for(&reservation)).unwrap();

        let err = desk.switch_mode(TradingMode::Turbo).unwrap_err();
        assert_eq!(err.code(), ReasonCode::ModeSwitchBlocked);
        assert_eq!(desk.mode(), TradingMode::Income);

        desk.close_position(reservation.trade_id, dec!(20));
        assert!(desk.switch_mode(TradingMode::Turbo).is_ok());
        assert_eq!(desk.mode(), TradingMode::Turbo);
    }

    #[test]
    fn test_reserved_order_blocks_mode_switch_until_settled() {
        let desk = desk_with(TradingMode::Income, RiskBudget::default());
        let released = desk
            .admit_and_reserve(candidate("SPY", 0.01), TradingMode::Income, &MarketSignal::default())
            .unwrap();
        let filled = desk
            .admit_and_reserve(candidate("QQQ", 0.01), TradingMode::Income, &MarketSignal::default())
            .unwrap();

        // nothing has filled yet, but both orders are in flight under income
        assert!(desk.open_positions().is_empty());
        let err = desk.switch_mode(TradingMode::Turbo).unwrap_err();
        assert!(matches!(
            err,
            PilotError::ModeSwitchBlocked { open_positions: 2, .. }
        ));

        desk.release(&released);
        assert!(desk.switch_mode(TradingMode::Turbo).is_err());

        let position = desk.confirm_fill(&filled, &fill_for(&filled)).unwrap();
        assert_eq!(position.mode, TradingMode::Income);
        assert!(desk.switch_mode(TradingMode::Turbo).is_err());

        desk.close_position(position.id, dec!(5));
        assert!(desk.switch_mode(TradingMode::Turbo).is_ok());
        assert_eq!(desk.mode(), TradingMode::Turbo);
    }

    #[test]
    fn test_weekly_loss_limit_tracks_week_pnl() {
        let desk = desk_with(TradingMode::Income, RiskBudget::default()).with_weekly_loss_limit(0.05);
        assert!(!desk.weekly_loss_limit_hit());

        let mut losses = Vec::new();
        for symbol in ["SPY", "QQQ"] {
            let reservation = desk
                .admit_and_reserve(candidate(symbol, 0.01), TradingMode::Income, &MarketSignal::default())
                .unwrap();
            losses.push(desk.confirm_fill(&reservation, &fill_for(&reservation)).unwrap());
        }

        desk.close_position(losses[0].id, dec!(-120));
        assert!(!desk.weekly_loss_limit_hit());
        // balance 4750 after both, 5% of it is 237.50
        desk.close_position(losses[1].id, dec!(-130));
        assert!(desk.weekly_loss_limit_hit());

        // a new day keeps the week's losses
        desk.reset_daily(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert!(desk.weekly_loss_limit_hit());
        desk.reset_weekly();
        assert!(!desk.weekly_loss_limit_hit());
    }

    #[test]
    fn test_desk_without_weekly_limit_never_trips() {
        let desk = desk_with(TradingMode::Income, RiskBudget::default());
        let reservation = desk
            .admit_and_reserve(candidate("SPY", 0.01), TradingMode::Income, &MarketSignal::default())
            .unwrap();
        let position = desk.confirm_fill(&reservation, &fill_for(&reservation)).unwrap();
        desk.close_position(position.id, dec!(-2000));
        assert!(!desk.weekly_loss_limit_hit());
    }

    #[test]
    fn test_broker_events_mark_and_close() {
        let desk = desk_with(TradingMode::Income, RiskBudget::default());
        let reservation = desk
            .admit_and_reserve(candidate("SPY", 0.01), TradingMode::Income, &MarketSignal::default())
            .unwrap();
        desk.confirm_fill(&reservation, &fill_for(&reservation)).unwrap();

        desk.apply_broker_event(&BrokerEvent::Mark {
            position_id: reservation.trade_id,
            mark_pnl: dec!(7),
        });
        assert_eq!(desk.open_positions()[0].current_mark_pnl, dec!(7));

        desk.apply_broker_event(&BrokerEvent::Closed(robopilot_core::CloseReport {
            position_id: reservation.trade_id,
            realized_pnl: dec!(-12),
            closed_at: Utc::now(),
        }));
        assert!(desk.open_positions().is_empty());

        let account = desk.snapshot();
        assert_eq!(account.balance, dec!(4988));
        assert_eq!(account.streak, -1);
    }
}
