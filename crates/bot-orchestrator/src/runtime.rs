//! Wiring of one trading process.

use crate::clock::MarketClock;
use crate::commands::LoopConfig;
use crate::control::ControlSurface;
use crate::desk::Desk;
use crate::health::HealthMonitor;
use crate::loop_control::LoopControl;
use crate::supervisor::LoopSupervisor;
use crate::trading_loop::LoopDeps;
use crate::watchdog::{Watchdog, WatchdogSettings};
use chrono::Utc;
use robopilot_core::{
    AccountState, AppConfig, BrokerGateway, LeaseStore, MarketDataSource, PeerNotifier, PositionSizer,
};
use robopilot_risk::{EdgeFilter, RiskFence, RiskLedger};
use robopilot_strategy::ModeController;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// External collaborators a process is assembled from.
pub struct Collaborators {
    pub broker: Arc<dyn BrokerGateway>,
    pub market: Arc<dyn MarketDataSource>,
    pub lease: Arc<dyn LeaseStore>,
    pub notifier: Arc<dyn PeerNotifier>,
}

pub struct PilotRuntime {
    pub deps: LoopDeps,
    pub supervisor: Arc<LoopSupervisor>,
    pub control: ControlSurface,
    pub watchdog: Watchdog,
}

impl PilotRuntime {
    /// Builds the desk and its supervisors. `restored` is the last persisted
    /// account snapshot, if any; `active` says whether this host won the
    /// trading lease at startup.
    #[must_use]
    pub fn build(
        config: &AppConfig,
        collaborators: Collaborators,
        restored: Option<&AccountState>,
        active: bool,
    ) -> Self {
        let now = Utc::now();
        let clock = MarketClock::default();
        let day = clock.trading_day(now);

        let (ledger, mode) = match restored {
            Some(snapshot) => {
                info!(balance = %snapshot.balance, mode = %snapshot.mode, streak = snapshot.streak, "Restoring account");
                (RiskLedger::restore(snapshot, day), snapshot.mode)
            }
            None => (
                RiskLedger::new(config.account.initial_capital, day),
                config.account.mode,
            ),
        };

        let (events, _) = broadcast::channel(1024);
        let fence = RiskFence::new(
            EdgeFilter::default(),
            PositionSizer::new(config.sizing.clone()),
            config.risk.min_edge_probability,
        );
        let desk = Arc::new(Desk::new(
            ledger,
            ModeController::new(mode, config.strategies.clone(), events.clone()),
            config.risk.budget(),
            fence,
            events,
        )
        .with_weekly_loss_limit(config.risk.weekly_loss_limit));

        let own = config.failover.host;
        let health = Arc::new(HealthMonitor::new(own, if active { own } else { own.peer() }, now));
        let control = Arc::new(LoopControl::default());
        let inflight = Arc::new(RwLock::new(()));
        let loop_config = LoopConfig::from(config);

        let deps = LoopDeps {
            desk: Arc::clone(&desk),
            control: Arc::clone(&control),
            health: Arc::clone(&health),
            broker: Arc::clone(&collaborators.broker),
            market: collaborators.market,
            inflight: Arc::clone(&inflight),
            clock,
            config: loop_config,
        };

        let supervisor = Arc::new(LoopSupervisor::new(deps.clone()));
        let watchdog = Watchdog::new(
            WatchdogSettings::from(&config.watchdog),
            Arc::clone(&health),
            supervisor.clone(),
            collaborators.lease,
            collaborators.notifier,
            config.failover.holder_id.clone(),
        );
        let surface = ControlSurface::new(
            desk,
            control,
            health,
            collaborators.broker,
            inflight,
            loop_config.retry,
            watchdog.takeover_signal(),
        );

        Self {
            deps,
            supervisor,
            control: surface,
            watchdog,
        }
    }
}

/// Applies hot-reloaded risk limits to the desk.
///
/// Only a change to the file's `[risk]` limits is applied, so limits set by
/// an operator at runtime survive reloads that touch other sections.
#[must_use]
pub fn spawn_budget_sync(desk: Arc<Desk>, mut configs: watch::Receiver<AppConfig>) -> JoinHandle<()> {
    let mut file_budget = configs.borrow().risk.budget();
    tokio::spawn(async move {
        while configs.changed().await.is_ok() {
            let budget = configs.borrow_and_update().risk.budget();
            if budget == file_budget {
                debug!("Config reloaded without risk changes");
                continue;
            }
            file_budget = budget;
            if let Err(e) = desk.replace_budget(budget) {
                warn!(error = %e, "Reloaded risk budget rejected");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::InMemoryLeaseStore;
    use crate::peer::NoopPeerNotifier;
    use robopilot_core::{MarketSnapshot, RiskBudget, TradingMode};
    use robopilot_execution::{PaperBroker, ScriptedFeed};
    use rust_decimal_macros::dec;

    fn collaborators() -> Collaborators {
        Collaborators {
            broker: Arc::new(PaperBroker::new(0)),
            market: Arc::new(ScriptedFeed::new(vec![MarketSnapshot::calm(Utc::now())])),
            lease: Arc::new(InMemoryLeaseStore::new()),
            notifier: Arc::new(NoopPeerNotifier),
        }
    }

    #[tokio::test]
    async fn test_build_from_defaults() {
        let runtime = PilotRuntime::build(&AppConfig::default(), collaborators(), None, true);
        let stats = runtime.control.stats();

        assert_eq!(stats.balance, dec!(5000));
        assert_eq!(stats.mode, TradingMode::Income);
        assert!(stats.is_active);
    }

    #[tokio::test]
    async fn test_build_restores_snapshot_and_standby() {
        let mut snapshot = AccountState::new(dec!(6100), TradingMode::Turbo);
        snapshot.streak = -2;
        let runtime = PilotRuntime::build(&AppConfig::default(), collaborators(), Some(&snapshot), false);

        let stats = runtime.control.stats();
        assert_eq!(stats.balance, dec!(6100));
        assert_eq!(stats.mode, TradingMode::Turbo);
        assert_eq!(stats.streak, -2);
        assert!(!stats.is_active);
    }

    #[tokio::test]
    async fn test_budget_sync_applies_reloads() {
        let runtime = PilotRuntime::build(&AppConfig::default(), collaborators(), None, true);
        let (tx, rx) = watch::channel(AppConfig::default());
        let task = spawn_budget_sync(Arc::clone(&runtime.deps.desk), rx);

        let mut config = AppConfig::default();
        config.risk.daily_limit = 0.04;
        tx.send(config).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(
            runtime.deps.desk.budget(),
            RiskBudget {
                daily_limit_fraction: 0.04,
                ..RiskBudget::default()
            }
        );
    }

    #[tokio::test]
    async fn test_budget_sync_keeps_operator_limits_across_unrelated_reloads() {
        let runtime = PilotRuntime::build(&AppConfig::default(), collaborators(), None, true);
        let desk = Arc::clone(&runtime.deps.desk);
        let (tx, rx) = watch::channel(AppConfig::default());
        let task = spawn_budget_sync(Arc::clone(&desk), rx);

        let operator = desk.update_budget(0.03, 0.005).unwrap();

        let mut config = AppConfig::default();
        config.trading.tick_interval_secs = 30;
        tx.send(config.clone()).unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(desk.budget(), operator);

        // a later edit to the risk section still wins
        let (tx, rx) = watch::channel(config.clone());
        let task = spawn_budget_sync(Arc::clone(&desk), rx);
        config.risk.daily_limit = 0.05;
        tx.send(config).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(
            desk.budget(),
            RiskBudget {
                daily_limit_fraction: 0.05,
                ..RiskBudget::default()
            }
        );
    }
}
