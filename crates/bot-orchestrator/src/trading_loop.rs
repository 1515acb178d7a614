//! The trading loop actor.
//!
//! Each tick gathers market data and broker updates under a bound, applies
//! the updates, runs every candidate through the desk, and hands admitted
//! orders to submission tasks. Submissions run off the loop so a slow
//! broker never stalls the next tick; each one holds a read permit on the
//! in-flight gate, which liquidation takes for writing to drain them.

use crate::clock::MarketClock;
use crate::commands::{HaltReason, LoopCommand, LoopConfig, LoopState, TickOutcome, TickReport};
use crate::desk::{Desk, Reservation};
use crate::health::HealthMonitor;
use crate::loop_control::LoopControl;
use chrono::{DateTime, Utc};
use robopilot_core::{BrokerEvent, BrokerGateway, MarketDataSource, MarketSnapshot, PilotError};
use robopilot_execution::submit_with_retry;
use robopilot_strategy::CandidateGenerator;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Everything a loop instance needs. Shared state outlives any one loop
/// task, so a supervisor restart only replaces the actor.
#[derive(Clone)]
pub struct LoopDeps {
    pub desk: Arc<Desk>,
    pub control: Arc<LoopControl>,
    pub health: Arc<HealthMonitor>,
    pub broker: Arc<dyn BrokerGateway>,
    pub market: Arc<dyn MarketDataSource>,
    pub inflight: Arc<RwLock<()>>,
    pub clock: MarketClock,
    pub config: LoopConfig,
}

impl LoopDeps {
    /// Waits until no submission is in flight.
    pub async fn wait_for_submissions(&self) {
        drop(self.inflight.write().await);
    }
}

enum Gathered {
    Ready(MarketSnapshot, Vec<BrokerEvent>),
    /// Broker updates arrived but market data did not.
    NoMarket(TickOutcome, Vec<BrokerEvent>),
    TimedOut,
}

pub struct TradingLoop {
    deps: LoopDeps,
    rx: mpsc::Receiver<LoopCommand>,
}

impl TradingLoop {
    #[must_use]
    pub const fn new(deps: LoopDeps, rx: mpsc::Receiver<LoopCommand>) -> Self {
        Self { deps, rx }
    }

    /// Ticks on the configured interval until shut down.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.deps.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.deps.config.tick_interval, "Trading loop started");

        loop {
            tokio::select! {
                biased;
                cmd = self.rx.recv() => match cmd {
                    Some(LoopCommand::Tick(reply)) => {
                        let report = self.tick().await;
                        let _ = reply.send(report);
                    }
                    Some(LoopCommand::Shutdown) | None => break,
                },
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    debug!(outcome = ?report.outcome, admitted = report.admitted, "Tick finished");
                }
            }
        }

        info!("Trading loop stopped");
    }

    pub async fn tick(&self) -> TickReport {
        let now = Utc::now();
        let report = self.tick_at(now).await;
        let skipped = matches!(report.outcome, TickOutcome::TimedOut | TickOutcome::InputError);
        self.deps.control.record_tick(now, skipped);
        report
    }

    async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let deps = &self.deps;
        deps.health.beat(now);

        if let Some(outcome) = self.idle_outcome(now) {
            return TickReport::idle(now, outcome);
        }
        if deps.inflight.try_read().is_err() {
            return TickReport::idle(now, TickOutcome::Draining);
        }

        let (snapshot, events) = match self.gather().await {
            Gathered::Ready(snapshot, events) => (snapshot, events),
            Gathered::NoMarket(outcome, events) => {
                self.apply_events(&events);
                return TickReport {
                    broker_events: events.len(),
                    ..TickReport::idle(now, outcome)
                };
            }
            Gathered::TimedOut => {
                warn!(timeout = ?deps.config.tick_timeout, "Tick inputs timed out, candidates deferred");
                return TickReport::idle(now, TickOutcome::TimedOut);
            }
        };

        self.apply_events(&events);
        let mut report = TickReport {
            broker_events: events.len(),
            ..TickReport::idle(now, TickOutcome::Completed)
        };

        // state may have changed while we were waiting on inputs
        if let Some(outcome) = self.idle_outcome(now) {
            report.outcome = outcome;
            return report;
        }
        if deps.desk.weekly_loss_limit_hit() {
            debug!(week_pnl = %deps.desk.snapshot().week_pnl, "Weekly loss limit reached, no new entries");
            report.outcome = TickOutcome::WeeklyLossLimit;
            return report;
        }

        let strategies = deps.desk.active_strategies();
        let candidates = strategies.generate(&snapshot, &deps.desk.snapshot());
        report.candidates = candidates.len();

        for candidate in candidates {
            if !deps.control.is_running() {
                break;
            }
            let symbol = candidate.symbol.clone();
            let strategy_id = candidate.strategy_id.clone();
            let signal = snapshot.signal_for(&symbol);

            match deps.desk.admit_and_reserve(candidate, strategies.mode(), &signal) {
                Ok(reservation) => {
                    report.admitted += 1;
                    self.spawn_submission(reservation);
                }
                Err(PilotError::Rejected(reason)) => {
                    report.rejected += 1;
                    deps.control.record_rejection(now, &symbol, &strategy_id, &reason);
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, %symbol, "Fatal error during admission");
                    halt(deps, HaltReason::BudgetExceeded);
                    break;
                }
                Err(e) => {
                    warn!(error = %e, %symbol, %strategy_id, "Candidate dropped");
                }
            }
        }

        report
    }

    fn idle_outcome(&self, now: DateTime<Utc>) -> Option<TickOutcome> {
        let deps = &self.deps;
        match deps.control.state() {
            LoopState::Halted => return Some(TickOutcome::Halted),
            LoopState::Paused => return Some(TickOutcome::Paused),
            LoopState::Running => {}
        }
        if !deps.health.is_writer() {
            return Some(TickOutcome::Standby);
        }
        if deps.config.respect_market_hours && !deps.clock.is_market_open(now) {
            return Some(TickOutcome::MarketClosed);
        }
        None
    }

    async fn gather(&self) -> Gathered {
        let deps = &self.deps;
        let inputs = async {
            let snapshot = tokio::time::timeout(deps.config.market_data_timeout, deps.market.snapshot()).await;
            let events = match deps.broker.poll_events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "Broker event poll failed");
                    deps.control.record_broker_failure();
                    Vec::new()
                }
            };
            (snapshot, events)
        };

        match tokio::time::timeout(deps.config.tick_timeout, inputs).await {
            Err(_) => Gathered::TimedOut,
            Ok((Ok(Ok(snapshot)), events)) => Gathered::Ready(snapshot, events),
            Ok((Ok(Err(e)), events)) => {
                warn!(error = %e, "Market data unavailable, candidates deferred");
                Gathered::NoMarket(TickOutcome::InputError, events)
            }
            Ok((Err(_), events)) => {
                warn!(timeout = ?deps.config.market_data_timeout, "Market data timed out, candidates deferred");
                Gathered::NoMarket(TickOutcome::TimedOut, events)
            }
        }
    }

    fn apply_events(&self, events: &[BrokerEvent]) {
        for event in events {
            self.deps.desk.apply_broker_event(event);
        }
    }

    fn spawn_submission(&self, reservation: Reservation) {
        let deps = self.deps.clone();
        let Ok(permit) = Arc::clone(&deps.inflight).try_read_owned() else {
            debug!(trade_id = %reservation.trade_id, "Liquidation started, reservation released");
            deps.desk.release(&reservation);
            return;
        };

        tokio::spawn(async move {
            let _permit = permit;
            let order = reservation.order(Utc::now());

            match submit_with_retry(deps.broker.as_ref(), &order, &deps.config.retry).await {
                Ok(fill) => {
                    if let Err(e) = deps.desk.confirm_fill(&reservation, &fill) {
                        error!(
                            error = %e,
                            trade_id = %reservation.trade_id,
                            symbol = %reservation.candidate.symbol,
                            "Fill could not be booked, broker position needs reconciliation"
                        );
                        if e.is_fatal() {
                            halt(&deps, HaltReason::BudgetExceeded);
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        trade_id = %reservation.trade_id,
                        symbol = %reservation.candidate.symbol,
                        "Submission failed, reservation released"
                    );
                    deps.control.record_broker_failure();
                    deps.desk.release(&reservation);
                }
            }
        });
    }
}

fn halt(deps: &LoopDeps, reason: HaltReason) {
    if deps.control.halt(reason) {
        deps.desk.emit_halt(&reason.to_string());
    }
}
