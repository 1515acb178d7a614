//! Exchange session clock and daily rollover.

use crate::desk::Desk;
use crate::state_store::SqliteStateStore;
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use robopilot_risk::DailyArchive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// US equity options session: 09:30 to 16:00 New York time, weekdays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketClock {
    tz: Tz,
    /// Seconds after local midnight.
    open: u32,
    close: u32,
}

impl Default for MarketClock {
    fn default() -> Self {
        Self {
            tz: New_York,
            open: 9 * 3600 + 30 * 60,
            close: 16 * 3600,
        }
    }
}

impl MarketClock {
    /// Calendar day in exchange time. Daily budgets reset on this boundary.
    #[must_use]
    pub fn trading_day(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    #[must_use]
    pub fn is_market_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let secs = local.num_seconds_from_midnight();
        secs >= self.open && secs < self.close
    }
}

/// Resets the desk when the exchange date changes.
pub struct DayRollover {
    desk: Arc<Desk>,
    clock: MarketClock,
    store: Option<SqliteStateStore>,
}

impl DayRollover {
    #[must_use]
    pub const fn new(desk: Arc<Desk>, clock: MarketClock, store: Option<SqliteStateStore>) -> Self {
        Self { desk, clock, store }
    }

    /// Rolls the desk over if `now` is on a later trading day. A new ISO
    /// week also clears weekly P&L.
    pub async fn check(&self, now: DateTime<Utc>) -> Option<DailyArchive> {
        let today = self.clock.trading_day(now);
        let current = self.desk.trading_day();
        if today <= current {
            return None;
        }

        let new_week = today.iso_week() != current.iso_week();
        let archive = self.desk.reset_daily(today);
        if new_week {
            self.desk.reset_weekly();
        }
        info!(
            closed_day = %archive.day,
            risk_used = archive.risk_used_fraction,
            pnl = %archive.pnl,
            trades = archive.trades,
            new_week,
            "Trading day rolled over"
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.archive_day(&archive).await {
                warn!(error = %e, day = %archive.day, "Failed to persist daily archive");
            }
        }
        Some(archive)
    }

    pub async fn run(self, check_every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(check_every);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check(Utc::now()).await;
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use robopilot_core::{RiskBudget, StrategiesConfig, TradingMode};
    use robopilot_risk::{RiskFence, RiskLedger};
    use robopilot_strategy::ModeController;
    use rust_decimal_macros::dec;
    use tokio::sync::broadcast;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn desk_on(day: NaiveDate) -> Arc<Desk> {
        let (tx, _) = broadcast::channel(16);
        Arc::new(Desk::new(
            RiskLedger::new(dec!(5000), day),
            ModeController::new(TradingMode::Income, StrategiesConfig::default(), tx.clone()),
            RiskBudget::default(),
            RiskFence::default(),
            tx,
        ))
    }

    #[test]
    fn test_session_hours_in_new_york() {
        let clock = MarketClock::default();
        // 2024-03-05 is a Tuesday; EST is UTC-5 before the DST switch
        assert!(!clock.is_market_open(utc(2024, 3, 5, 14, 29)));
        assert!(clock.is_market_open(utc(2024, 3, 5, 14, 30)));
        assert!(clock.is_market_open(utc(2024, 3, 5, 20, 59)));
        assert!(!clock.is_market_open(utc(2024, 3, 5, 21, 0)));
    }

    #[test]
    fn test_closed_on_weekends() {
        let clock = MarketClock::default();
        // Saturday midday
        assert!(!clock.is_market_open(utc(2024, 3, 9, 16, 0)));
    }

    #[test]
    fn test_trading_day_uses_exchange_date() {
        let clock = MarketClock::default();
        // 02:00 UTC Wednesday is still Tuesday evening in New York
        assert_eq!(
            clock.trading_day(utc(2024, 3, 6, 2, 0)),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
    }

    #[tokio::test]
    async fn test_rollover_resets_once_per_day() {
        let desk = desk_on(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        let rollover = DayRollover::new(Arc::clone(&desk), MarketClock::default(), None);

        assert!(rollover.check(utc(2024, 3, 5, 18, 0)).await.is_none());

        let archive = rollover.check(utc(2024, 3, 6, 15, 0)).await.unwrap();
        assert_eq!(archive.day, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(desk.trading_day(), NaiveDate::from_ymd_opt(2024, 3, 6).unwrap());

        assert!(rollover.check(utc(2024, 3, 6, 16, 0)).await.is_none());
    }

    #[tokio::test]
    async fn test_monday_rollover_clears_week_pnl() {
        let desk = desk_on(NaiveDate::from_ymd_opt(2024, 3, 8).unwrap());
        let candidate = robopilot_core::CandidateTrade {
            strategy_id: "credit_spread_3dte".to_string(),
            symbol: "SPY".to_string(),
            proposed_size: 0.01,
            edge_score: 0.7,
            estimated_risk: 0.01,
        };
        let reservation = desk
            .admit_and_reserve(candidate, TradingMode::Income, &robopilot_core::MarketSignal::default())
            .unwrap();
        let fill = robopilot_core::Fill {
            trade_id: reservation.trade_id,
            symbol: "SPY".to_string(),
            basis: dec!(50),
            filled_at: utc(2024, 3, 8, 15, 0),
        };
        desk.confirm_fill(&reservation, &fill).unwrap();
        desk.close_position(reservation.trade_id, dec!(25));
        assert_eq!(desk.snapshot().week_pnl, dec!(25));

        let rollover = DayRollover::new(Arc::clone(&desk), MarketClock::default(), None);

        rollover.check(utc(2024, 3, 11, 14, 0)).await.unwrap();
        assert_eq!(desk.snapshot().week_pnl, dec!(0));
        assert_eq!(desk.trading_day(), NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
    }
}
