use crate::account::TradingMode;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An open position, created on admission plus fill and removed on close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub strategy_id: String,
    /// Mode whose strategy set opened the position.
    pub mode: TradingMode,
    pub open_timestamp: DateTime<Utc>,
    /// Entry cost.
    pub basis: Decimal,
    pub current_mark_pnl: Decimal,
    /// Admitted risk as a fraction of balance at entry.
    pub pct_of_balance: f64,
}

impl Position {
    /// Applies a mark update from the broker.
    pub fn mark(&mut self, mark_pnl: Decimal) {
        self.current_mark_pnl = mark_pnl;
    }
}
