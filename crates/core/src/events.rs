use crate::account::{RiskBudget, TradingMode};
use crate::error::ReasonCode;
use crate::position::Position;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order handed to the broker gateway for an admitted candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub trade_id: Uuid,
    pub symbol: String,
    pub strategy_id: String,
    pub mode: TradingMode,
    pub size_fraction: f64,
    /// Money committed to the order.
    pub notional: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub trade_id: Uuid,
    pub symbol: String,
    /// Entry cost including commission.
    pub basis: Decimal,
    pub filled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseReport {
    pub position_id: Uuid,
    pub realized_pnl: Decimal,
    pub closed_at: DateTime<Utc>,
}

/// Asynchronous updates reported by the broker between ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BrokerEvent {
    Mark { position_id: Uuid, mark_pnl: Decimal },
    Closed(CloseReport),
}

/// Events published by the desk for reporting and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeskEvent {
    Admitted {
        trade_id: Uuid,
        symbol: String,
        strategy_id: String,
        size_fraction: f64,
    },
    Rejected {
        symbol: String,
        strategy_id: String,
        reason: ReasonCode,
    },
    Filled {
        position: Position,
    },
    Released {
        trade_id: Uuid,
        symbol: String,
    },
    PositionClosed {
        position_id: Uuid,
        symbol: String,
        realized_pnl: Decimal,
    },
    ModeChanged {
        from: TradingMode,
        to: TradingMode,
    },
    RiskBudgetUpdated {
        budget: RiskBudget,
    },
    DailyReset {
        day: NaiveDate,
    },
    Halted {
        reason: String,
    },
}
