pub mod clock;
pub mod commands;
pub mod control;
pub mod desk;
pub mod health;
pub mod lease;
pub mod loop_control;
pub mod loop_handle;
pub mod peer;
pub mod runtime;
pub mod state_store;
pub mod supervisor;
pub mod trading_loop;
pub mod watchdog;

#[cfg(test)]
mod testing;

pub use clock::{DayRollover, MarketClock};
pub use commands::{HaltReason, LoopCommand, LoopConfig, LoopState, TickOutcome, TickReport, Transition};
pub use control::{
    CommandAck, ControlCommand, ControlSurface, ExitReport, HealthReport, PositionView, StatsReport,
    SystemStatus,
};
pub use desk::{Desk, Reservation};
pub use health::HealthMonitor;
pub use lease::{InMemoryLeaseStore, SqliteLeaseStore};
pub use loop_control::{LoopControl, LoopStats, RejectionRecord};
pub use loop_handle::LoopHandle;
pub use peer::{HttpPeerNotifier, NoopPeerNotifier};
pub use runtime::{spawn_budget_sync, Collaborators, PilotRuntime};
pub use state_store::{spawn_persistence, SqliteStateStore};
pub use supervisor::{LoopSupervisor, Supervised};
pub use trading_loop::{LoopDeps, TradingLoop};
pub use watchdog::{Watchdog, WatchdogAction, WatchdogSettings};
