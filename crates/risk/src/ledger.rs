//! Daily risk accounting and the append-only trade log.
//!
//! The ledger is the only writer of balance, streak, and risk usage. Risk
//! moves through two stages: a reservation taken at admission, and a
//! commitment when the broker confirms the fill. Both count against the
//! daily budget, so concurrent admissions cannot double-spend it.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use robopilot_core::{AccountState, PilotError, TradingMode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, info};
use uuid::Uuid;

/// Usage can never exceed the whole balance.
const MAX_USAGE: f64 = 1.0;
/// Float slack for sums of fractions.
pub(crate) const USAGE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Reserved,
    Filled,
    Released,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: LedgerEntryKind,
    pub trade_id: Uuid,
    pub symbol: String,
    pub risk_fraction: f64,
    pub pnl: Option<Decimal>,
}

/// A finished trading day's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyArchive {
    pub day: NaiveDate,
    pub risk_used_fraction: f64,
    pub pnl: Decimal,
    pub trades: u32,
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Clone)]
struct Reservation {
    symbol: String,
    risk: f64,
}

#[derive(Debug, Clone)]
pub struct RiskLedger {
    balance: Decimal,
    committed_risk: f64,
    reservations: HashMap<Uuid, Reservation>,
    streak: i32,
    today_pnl: Decimal,
    week_pnl: Decimal,
    trades_today: u32,
    log: Vec<LedgerEntry>,
    archive: Vec<DailyArchive>,
    trading_day: NaiveDate,
}

impl RiskLedger {
    #[must_use]
    pub fn new(balance: Decimal, trading_day: NaiveDate) -> Self {
        Self {
            balance,
            committed_risk: 0.0,
            reservations: HashMap::new(),
            streak: 0,
            today_pnl: Decimal::ZERO,
            week_pnl: Decimal::ZERO,
            trades_today: 0,
            log: Vec::new(),
            archive: Vec::new(),
            trading_day,
        }
    }

    /// Rebuilds a ledger from a persisted snapshot. Reservations are not
    /// persisted, so all restored usage is committed risk.
    ///
    /// A snapshot from an earlier day is rolled forward to `trading_day`:
    /// daily figures start at zero, and weekly P&L too when the ISO week
    /// changed. A snapshot without a recorded day is taken as `trading_day`.
    #[must_use]
    pub fn restore(snapshot: &AccountState, trading_day: NaiveDate) -> Self {
        let saved_day = snapshot.trading_day.unwrap_or(trading_day);
        let mut ledger = Self {
            balance: snapshot.balance,
            committed_risk: snapshot.daily_risk_used_fraction,
            streak: snapshot.streak,
            today_pnl: snapshot.today_pnl,
            week_pnl: snapshot.week_pnl,
            trades_today: snapshot.trades_today,
            ..Self::new(snapshot.balance, saved_day)
        };

        if saved_day < trading_day {
            info!(%saved_day, %trading_day, "Restored snapshot is from an earlier day");
            ledger.reset_daily(trading_day);
            if saved_day.iso_week() != trading_day.iso_week() {
                ledger.reset_weekly();
            }
        }
        ledger
    }

    #[must_use]
    pub const fn balance(&self) -> Decimal {
        self.balance
    }

    #[must_use]
    pub const fn streak(&self) -> i32 {
        self.streak
    }

    #[must_use]
    pub const fn trades_today(&self) -> u32 {
        self.trades_today
    }

    #[must_use]
    pub const fn trading_day(&self) -> NaiveDate {
        self.trading_day
    }

    #[must_use]
    pub fn reserved_risk(&self) -> f64 {
        self.reservations.values().map(|r| r.risk).sum()
    }

    /// Committed plus reserved risk.
    #[must_use]
    pub fn daily_risk_used(&self) -> f64 {
        self.committed_risk + self.reserved_risk()
    }

    /// Holds `risk` against the day's budget until the order fills or fails.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a negative or non-finite amount or a reused
    /// trade id, and `BudgetExceeded` if usage would pass 1.0.
    pub fn reserve(&mut self, trade_id: Uuid, symbol: &str, risk: f64) -> Result<(), PilotError> {
        if !risk.is_finite() || risk < 0.0 {
            return Err(PilotError::InvalidRequest(format!("invalid risk amount {risk}")));
        }
        if self.reservations.contains_key(&trade_id) {
            return Err(PilotError::InvalidRequest(format!(
                "trade {trade_id} already holds a reservation"
            )));
        }
        self.check_capacity(risk)?;

        self.reservations.insert(
            trade_id,
            Reservation {
                symbol: symbol.to_string(),
                risk,
            },
        );
        self.append(LedgerEntryKind::Reserved, trade_id, symbol, risk, None);
        Ok(())
    }

    /// Returns a reservation to the budget after a failed submission.
    pub fn release(&mut self, trade_id: Uuid) -> Option<f64> {
        let reservation = self.reservations.remove(&trade_id)?;
        self.append(
            LedgerEntryKind::Released,
            trade_id,
            &reservation.symbol,
            reservation.risk,
            None,
        );
        Some(reservation.risk)
    }

    /// Commits a fill's realized risk, consuming any reservation held for it.
    ///
    /// # Errors
    ///
    /// Returns `BudgetExceeded` if the commit would push usage above 1.0. The
    /// ledger is left unchanged in that case.
    pub fn record_fill(&mut self, trade_id: Uuid, symbol: &str, realized_risk: f64) -> Result<(), PilotError> {
        if !realized_risk.is_finite() || realized_risk < 0.0 {
            return Err(PilotError::InvalidRequest(format!(
                "invalid realized risk {realized_risk}"
            )));
        }
        let reserved = self.reservations.get(&trade_id).map_or(0.0, |r| r.risk);
        let used_without = self.daily_risk_used() - reserved;

        if used_without + realized_risk > MAX_USAGE + USAGE_EPSILON {
            error!(
                %trade_id,
                symbol,
                used = used_without,
                attempted = realized_risk,
                "Ledger overflow on fill"
            );
            return Err(PilotError::BudgetExceeded {
                used: used_without,
                attempted: realized_risk,
            });
        }

        self.reservations.remove(&trade_id);
        self.committed_risk += realized_risk;
        self.trades_today += 1;
        self.append(LedgerEntryKind::Filled, trade_id, symbol, realized_risk, None);
        Ok(())
    }

    /// Books realized P&L from a closed position and updates the streak.
    pub fn record_close(&mut self, trade_id: Uuid, symbol: &str, pnl: Decimal) {
        self.balance += pnl;
        self.today_pnl += pnl;
        self.week_pnl += pnl;

        self.streak = if pnl > Decimal::ZERO {
            self.streak.max(0) + 1
        } else if pnl < Decimal::ZERO {
            self.streak.min(0) - 1
        } else {
            0
        };

        self.append(LedgerEntryKind::Closed, trade_id, symbol, 0.0, Some(pnl));
    }

    /// Starts a new trading day: zeroes usage and archives the prior day's log.
    pub fn reset_daily(&mut self, day: NaiveDate) -> DailyArchive {
        let archive = DailyArchive {
            day: self.trading_day,
            risk_used_fraction: self.daily_risk_used(),
            pnl: self.today_pnl,
            trades: self.trades_today,
            entries: std::mem::take(&mut self.log),
        };

        if !self.reservations.is_empty() {
            info!(
                count = self.reservations.len(),
                "Dropping in-flight reservations at day boundary"
            );
        }
        self.reservations.clear();
        self.committed_risk = 0.0;
        self.today_pnl = Decimal::ZERO;
        self.trades_today = 0;
        self.trading_day = day;
        self.archive.push(archive.clone());

        info!(day = %day, previous_pnl = %archive.pnl, "Daily risk reset");
        archive
    }

    pub fn reset_weekly(&mut self) {
        self.week_pnl = Decimal::ZERO;
        info!("Weekly P&L reset");
    }

    /// Immutable copy of the account for reporting.
    #[must_use]
    pub fn snapshot(&self, mode: TradingMode) -> AccountState {
        AccountState {
            balance: self.balance,
            mode,
            daily_risk_used_fraction: self.daily_risk_used(),
            streak: self.streak,
            today_pnl: self.today_pnl,
            week_pnl: self.week_pnl,
            trades_today: self.trades_today,
            trading_day: Some(self.trading_day),
        }
    }

    #[must_use]
    pub fn log(&self) -> &[LedgerEntry] {
        &self.log
    }

    #[must_use]
    pub fn archive(&self) -> &[DailyArchive] {
        &self.archive
    }

    fn check_capacity(&self, risk: f64) -> Result<(), PilotError> {
        let used = self.daily_risk_used();
        if used + risk > MAX_USAGE + USAGE_EPSILON {
            return Err(PilotError::BudgetExceeded {
                used,
                attempted: risk,
            });
        }
        Ok(())
    }

    fn append(&mut self, kind: LedgerEntryKind, trade_id: Uuid, symbol: &str, risk_fraction: f64, pnl: Option<Decimal>) {
        self.log.push(LedgerEntry {
            timestamp: Utc::now(),
            kind,
            trade_id,
            symbol: symbol.to_string(),
            risk_fraction,
            pnl,
        });
    }
}
