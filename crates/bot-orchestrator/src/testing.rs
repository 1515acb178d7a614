//! Shared fixtures for unit tests.

use crate::clock::MarketClock;
use crate::commands::LoopConfig;
use crate::desk::Desk;
use crate::health::HealthMonitor;
use crate::loop_control::LoopControl;
use crate::trading_loop::LoopDeps;
use chrono::Utc;
use robopilot_core::{Host, MarketSnapshot, RiskBudget, StrategiesConfig, TradingMode};
use robopilot_execution::{PaperBroker, RetryPolicy, ScriptedFeed};
use robopilot_risk::{RiskFence, RiskLedger};
use robopilot_strategy::ModeController;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

pub struct Fixture {
    pub deps: LoopDeps,
    pub broker: Arc<PaperBroker>,
    pub feed: Arc<ScriptedFeed>,
}

pub fn test_config() -> LoopConfig {
    LoopConfig {
        tick_interval: Duration::from_secs(60),
        tick_timeout: Duration::from_secs(1),
        market_data_timeout: Duration::from_millis(200),
        respect_market_hours: false,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            attempt_timeout: Duration::from_millis(500),
        },
    }
}

pub fn fixture(mode: TradingMode) -> Fixture {
    fixture_with(mode, vec![MarketSnapshot::calm(Utc::now())])
}

/// Fixture whose desk stops new entries at `limit` of weekly realized loss.
pub fn fixture_with_weekly_limit(mode: TradingMode, limit: f64) -> Fixture {
    let mut fx = fixture(mode);
    fx.deps.desk = Arc::new(desk(mode).with_weekly_loss_limit(limit));
    fx
}

fn desk(mode: TradingMode) -> Desk {
    let (events, _) = broadcast::channel(256);
    Desk::new(
        RiskLedger::new(dec!(5000), Utc::now().date_naive()),
        ModeController::new(mode, StrategiesConfig::default(), events.clone()),
        RiskBudget::default(),
        RiskFence::default(),
        events,
    )
}

pub fn fixture_with(mode: TradingMode, snapshots: Vec<MarketSnapshot>) -> Fixture {
    let now = Utc::now();
    let desk = desk(mode);

    let broker = Arc::new(PaperBroker::new(0));
    let feed = Arc::new(ScriptedFeed::new(snapshots));
    let deps = LoopDeps {
        desk: Arc::new(desk),
        control: Arc::new(LoopControl::default()),
        health: Arc::new(HealthMonitor::new(Host::Local, Host::Local, now)),
        broker: broker.clone(),
        market: feed.clone(),
        inflight: Arc::new(RwLock::new(())),
        clock: MarketClock::default(),
        config: test_config(),
    };

    Fixture { deps, broker, feed }
}
