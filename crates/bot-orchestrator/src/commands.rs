use chrono::{DateTime, Utc};
use robopilot_core::{AppConfig, ReasonCode};
use robopilot_execution::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;

/// Trading loop state machine. `Halted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Running,
    Paused,
    Halted,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Halted => "halted",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// Operator requested exit-all.
    EmergencyExit,
    /// Watchdog exhausted local restarts and handed off to the peer.
    FailoverExhausted,
    /// Ledger overflow on a fill.
    BudgetExceeded,
}

impl HaltReason {
    /// Fatal error code behind the halt, if any.
    #[must_use]
    pub const fn fatal_code(self) -> Option<ReasonCode> {
        match self {
            Self::EmergencyExit => None,
            Self::FailoverExhausted => Some(ReasonCode::WatchdogFailoverExhausted),
            Self::BudgetExceeded => Some(ReasonCode::BudgetExceeded),
        }
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EmergencyExit => "emergency_exit",
            Self::FailoverExhausted => "failover_exhausted",
            Self::BudgetExceeded => "budget_exceeded",
        })
    }
}

/// Result of a state-change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub state: LoopState,
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub tick_interval: Duration,
    /// Bound on gathering market data and broker updates for one tick.
    pub tick_timeout: Duration,
    pub market_data_timeout: Duration,
    pub respect_market_hours: bool,
    pub retry: RetryPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for LoopConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            tick_interval: config.trading.tick_interval(),
            tick_timeout: config.trading.tick_timeout(),
            market_data_timeout: config.trading.market_data_timeout(),
            respect_market_hours: config.trading.respect_market_hours,
            retry: RetryPolicy::from(&config.broker),
        }
    }
}

/// Why a tick produced no candidates, or that it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    Completed,
    Paused,
    Halted,
    /// Another host holds the trading lease.
    Standby,
    MarketClosed,
    /// Liquidation holds the submission gate.
    Draining,
    /// Realized losses this week reached the weekly limit; no new entries.
    WeeklyLossLimit,
    /// Inputs did not arrive within the tick timeout; candidates deferred.
    TimedOut,
    InputError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub outcome: TickOutcome,
    pub broker_events: usize,
    pub candidates: usize,
    pub admitted: usize,
    pub rejected: usize,
}

impl TickReport {
    #[must_use]
    pub const fn idle(at: DateTime<Utc>, outcome: TickOutcome) -> Self {
        Self {
            at,
            outcome,
            broker_events: 0,
            candidates: 0,
            admitted: 0,
            rejected: 0,
        }
    }
}

/// Messages to the trading loop actor.
#[derive(Debug)]
pub enum LoopCommand {
    /// Runs a tick immediately and reports it.
    Tick(oneshot::Sender<TickReport>),
    Shutdown,
}
