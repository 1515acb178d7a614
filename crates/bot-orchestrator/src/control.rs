//! Operator commands and reporting.
//!
//! Every command acts on shared state directly rather than through the loop
//! actor, so pause, halt and exit-all take effect even when a tick is hung.

use crate::commands::{HaltReason, LoopState, Transition};
use crate::desk::Desk;
use crate::health::HealthMonitor;
use crate::loop_control::{LoopControl, RejectionRecord};
use chrono::{DateTime, Utc};
use robopilot_core::{
    BrokerError, BrokerGateway, Host, PilotError, Position, ReasonCode, RiskBudget, TradingMode,
};
use robopilot_execution::{close_with_retry, RetryPolicy};
use robopilot_strategy::ModeTransition;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Risk usage above this share of the daily limit turns status yellow.
const RISK_WARNING_PCT: f64 = 80.0;

/// Operator commands, as also accepted over the status socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Pause,
    Resume,
    ExitAll,
    SwitchMode { mode: TradingMode },
    UpdateRisk { daily_limit: f64, per_trade_limit: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandAck {
    State(Transition),
    Exit(ExitReport),
    Mode(ModeTransition),
    Risk(RiskBudget),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitReport {
    pub closed: usize,
    pub failed: usize,
    pub realized_pnl: Decimal,
    pub state: LoopState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    pub id: Uuid,
    pub symbol: String,
    pub strategy: String,
    pub mode: TradingMode,
    pub opened_at: DateTime<Utc>,
    pub basis: Decimal,
    pub mark_pnl: Decimal,
    pub pct_of_balance: f64,
}

impl From<&Position> for PositionView {
    fn from(p: &Position) -> Self {
        Self {
            id: p.id,
            symbol: p.symbol.clone(),
            strategy: p.strategy_id.clone(),
            mode: p.mode,
            opened_at: p.open_timestamp,
            basis: p.basis,
            mark_pnl: p.current_mark_pnl,
            pct_of_balance: p.pct_of_balance,
        }
    }
}

/// Dashboard payload for `GET /api/stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub mode: TradingMode,
    pub balance: Decimal,
    pub today_pnl: Decimal,
    pub week_pnl: Decimal,
    pub positions: Vec<PositionView>,
    pub system_status: SystemStatus,
    pub is_paused: bool,
    /// Share of the daily limit consumed, in percent.
    pub risk_used: f64,
    pub last_update: DateTime<Utc>,
    pub loop_state: LoopState,
    pub halt_reason: Option<HaltReason>,
    pub active_host: Host,
    pub is_active: bool,
    pub streak: i32,
    pub trades_today: u32,
    pub daily_limit: f64,
    pub per_trade_limit: f64,
    pub weekly_loss_limit_hit: bool,
    pub rejections: BTreeMap<ReasonCode, u64>,
    pub last_rejection: Option<RejectionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub alive: bool,
    pub uptime_secs: i64,
    pub loop_state: LoopState,
    pub host: Host,
    pub active_host: Host,
    pub last_heartbeat: DateTime<Utc>,
    pub consecutive_failures: u32,
}

#[derive(Clone)]
pub struct ControlSurface {
    desk: Arc<Desk>,
    control: Arc<LoopControl>,
    health: Arc<HealthMonitor>,
    broker: Arc<dyn BrokerGateway>,
    inflight: Arc<RwLock<()>>,
    retry: RetryPolicy,
    takeover: Arc<Notify>,
    started_at: DateTime<Utc>,
}

impl ControlSurface {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        desk: Arc<Desk>,
        control: Arc<LoopControl>,
        health: Arc<HealthMonitor>,
        broker: Arc<dyn BrokerGateway>,
        inflight: Arc<RwLock<()>>,
        retry: RetryPolicy,
        takeover: Arc<Notify>,
    ) -> Self {
        Self {
            desk,
            control,
            health,
            broker,
            inflight,
            retry,
            takeover,
            started_at: Utc::now(),
        }
    }

    /// # Errors
    ///
    /// Returns the typed failure of the underlying operation.
    pub async fn execute(&self, command: ControlCommand) -> Result<CommandAck, PilotError> {
        info!(?command, "Control command received");
        let result = match command {
            ControlCommand::Pause => self.pause().map(CommandAck::State),
            ControlCommand::Resume => self.resume().map(CommandAck::State),
            ControlCommand::ExitAll => self.exit_all().await.map(CommandAck::Exit),
            ControlCommand::SwitchMode { mode } => self.switch_mode(mode).map(CommandAck::Mode),
            ControlCommand::UpdateRisk {
                daily_limit,
                per_trade_limit,
            } => self.update_risk(daily_limit, per_trade_limit).map(CommandAck::Risk),
        };
        if let Err(e) = &result {
            warn!(code = %e.code(), error = %e, "Control command failed");
        }
        result
    }

    /// # Errors
    ///
    /// Returns `TradingHalted` once halted.
    pub fn pause(&self) -> Result<Transition, PilotError> {
        self.control.pause()
    }

    /// # Errors
    ///
    /// Returns `TradingHalted` once halted.
    pub fn resume(&self) -> Result<Transition, PilotError> {
        self.control.resume()
    }

    /// # Errors
    ///
    /// Returns `ModeSwitchBlocked` while positions from the current mode are open.
    pub fn switch_mode(&self, target: TradingMode) -> Result<ModeTransition, PilotError> {
        self.desk.switch_mode(target)
    }

    /// # Errors
    ///
    /// Returns `InvalidRiskBudget` for limits outside `0 < per_trade <= daily <= 1`.
    pub fn update_risk(&self, daily_limit: f64, per_trade_limit: f64) -> Result<RiskBudget, PilotError> {
        self.desk.update_budget(daily_limit, per_trade_limit)
    }

    /// Emergency exit: halt, wait out in-flight submissions, then close
    /// every open position. Safe to repeat; a repeat sweeps whatever an
    /// earlier attempt could not close.
    ///
    /// # Errors
    ///
    /// Returns `BrokerUnavailable` naming the positions still open.
    pub async fn exit_all(&self) -> Result<ExitReport, PilotError> {
        if self.control.halt(HaltReason::EmergencyExit) {
            self.desk.emit_halt(&HaltReason::EmergencyExit.to_string());
        }

        // no new submission can start while we hold this
        let _gate = self.inflight.write().await;

        let mut closed = 0;
        let mut realized_pnl = Decimal::ZERO;
        let mut failed = Vec::new();
        for position in self.desk.open_positions() {
            match close_with_retry(self.broker.as_ref(), &position, &self.retry).await {
                Ok(report) => {
                    if self.desk.close_position(position.id, report.realized_pnl).is_some() {
                        closed += 1;
                        realized_pnl += report.realized_pnl;
                    }
                }
                Err(e) => {
                    error!(position_id = %position.id, symbol = %position.symbol, error = %e, "Failed to close position");
                    failed.push(position.symbol);
                }
            }
        }

        if !failed.is_empty() {
            return Err(PilotError::Broker(BrokerError::Unavailable(format!(
                "{} position(s) still open: {}",
                failed.len(),
                failed.join(", ")
            ))));
        }

        info!(closed, %realized_pnl, "All positions liquidated");
        Ok(ExitReport {
            closed,
            failed: 0,
            realized_pnl,
            state: self.control.state(),
        })
    }

    /// Wakes the watchdog to try the lease now instead of at its next poll.
    pub fn request_takeover(&self, from: Host) {
        info!(from = %from, "Peer requested takeover");
        self.takeover.notify_one();
    }

    #[must_use]
    pub fn stats(&self) -> StatsReport {
        let account = self.desk.snapshot();
        let budget = self.desk.budget();
        let positions = self.desk.open_positions();
        let loop_stats = self.control.stats();
        let state = self.control.state();
        let signal = self.health.signal();

        let risk_used = if budget.daily_limit_fraction > 0.0 {
            account.daily_risk_used_fraction / budget.daily_limit_fraction * 100.0
        } else {
            0.0
        };

        let is_active = self.health.is_writer();
        let weekly_loss_limit_hit = self.desk.weekly_loss_limit_hit();
        let system_status = if state != LoopState::Running {
            SystemStatus::Red
        } else if risk_used > RISK_WARNING_PCT
            || signal.consecutive_failures > 0
            || !is_active
            || weekly_loss_limit_hit
        {
            SystemStatus::Yellow
        } else {
            SystemStatus::Green
        };

        StatsReport {
            mode: account.mode,
            balance: account.balance,
            today_pnl: account.today_pnl,
            week_pnl: account.week_pnl,
            positions: positions.iter().map(PositionView::from).collect(),
            system_status,
            is_paused: state == LoopState::Paused,
            risk_used,
            last_update: Utc::now(),
            loop_state: state,
            halt_reason: self.control.halt_reason(),
            active_host: signal.active_host,
            is_active,
            streak: account.streak,
            trades_today: account.trades_today,
            daily_limit: budget.daily_limit_fraction,
            per_trade_limit: budget.per_trade_limit_fraction,
            weekly_loss_limit_hit,
            rejections: loop_stats.rejections,
            last_rejection: loop_stats.last_rejection,
        }
    }

    #[must_use]
    pub fn health(&self) -> HealthReport {
        let now = Utc::now();
        let signal = self.health.signal();
        HealthReport {
            alive: true,
            uptime_secs: (now - self.started_at).num_seconds(),
            loop_state: self.control.state(),
            host: self.health.own_host(),
            active_host: signal.active_host,
            last_heartbeat: signal.last_heartbeat,
            consecutive_failures: signal.consecutive_failures,
        }
    }
}
