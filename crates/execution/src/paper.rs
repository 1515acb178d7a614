use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use robopilot_core::{BrokerError, BrokerEvent, BrokerGateway, CloseReport, Fill, OrderRequest, Position};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// How simulated positions resolve while the paper broker is polled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlementModel {
    /// Probability a position expires at its profit target.
    pub win_probability: f64,
    /// Profit at target, as a fraction of basis.
    pub profit_fraction: f64,
    /// Loss when stopped out, as a fraction of basis.
    pub loss_fraction: f64,
    /// Polls a position stays open before settling.
    pub hold_polls: u32,
    pub seed: u64,
}

impl Default for SettlementModel {
    fn default() -> Self {
        Self {
            win_probability: 0.7,
            profit_fraction: 0.5,
            loss_fraction: 1.0,
            hold_polls: 5,
            seed: 7,
        }
    }
}

#[derive(Debug)]
struct PaperPosition {
    symbol: String,
    basis: Decimal,
    mark_pnl: Decimal,
    age_polls: u32,
}

struct PaperState {
    open: HashMap<Uuid, PaperPosition>,
    fills: HashMap<Uuid, Fill>,
    pending: Vec<BrokerEvent>,
    fail_submissions: u32,
    fail_closes: u32,
    rng: StdRng,
}

/// Broker gateway that fills locally and never touches a real account.
///
/// Submissions are idempotent per `trade_id`, so a retried order after a
/// timeout returns the original fill instead of opening a second position.
pub struct PaperBroker {
    state: Mutex<PaperState>,
    commission_bps: u32,
    settlement: Option<SettlementModel>,
    submit_delay: Mutex<Duration>,
}

impl PaperBroker {
    /// Creates a paper broker charging `commission_bps` basis points of notional.
    #[must_use]
    pub fn new(commission_bps: u32) -> Self {
        Self {
            state: Mutex::new(PaperState {
                open: HashMap::new(),
                fills: HashMap::new(),
                pending: Vec::new(),
                fail_submissions: 0,
                fail_closes: 0,
                rng: StdRng::seed_from_u64(0),
            }),
            commission_bps,
            settlement: None,
            submit_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Lets positions drift and settle on their own as events are polled.
    #[must_use]
    pub fn with_settlement(mut self, model: SettlementModel) -> Self {
        self.state.get_mut().rng = StdRng::seed_from_u64(model.seed);
        self.settlement = Some(model);
        self
    }

    /// Makes the next `n` submissions fail as unavailable.
    pub fn fail_next_submissions(&self, n: u32) {
        self.state.lock().fail_submissions = n;
    }

    /// Makes the next `n` close requests fail as unavailable.
    pub fn fail_next_closes(&self, n: u32) {
        self.state.lock().fail_closes = n;
    }

    /// Delays every submission, for exercising timeouts.
    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock() = delay;
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Queues a mark update for an open position.
    pub fn mark(&self, position_id: Uuid, mark_pnl: Decimal) {
        let mut state = self.state.lock();
        if let Some(position) = state.open.get_mut(&position_id) {
            position.mark_pnl = mark_pnl;
            state.pending.push(BrokerEvent::Mark {
                position_id,
                mark_pnl,
            });
        }
    }

    /// Settles an open position at `realized_pnl`, as at expiry.
    pub fn settle(&self, position_id: Uuid, realized_pnl: Decimal) {
        let mut state = self.state.lock();
        settle_locked(&mut state, position_id, realized_pnl);
    }

    fn commission(&self, notional: Decimal) -> Decimal {
        (notional * Decimal::from(self.commission_bps) / Decimal::from(10_000)).round_dp(2)
    }

    fn simulate(&self, state: &mut PaperState) {
        let Some(model) = self.settlement else {
            return;
        };

        let ids: Vec<Uuid> = state.open.keys().copied().collect();
        for id in ids {
            let roll: f64 = state.rng.gen();
            let drift: f64 = state.rng.gen_range(-0.2..0.2);
            let Some(position) = state.open.get_mut(&id) else {
                continue;
            };
            position.age_polls += 1;

            if position.age_polls >= model.hold_polls {
                let fraction = if roll < model.win_probability {
                    model.profit_fraction
                } else {
                    -model.loss_fraction
                };
                let pnl = fraction_of(position.basis, fraction);
                settle_locked(state, id, pnl);
            } else {
                position.mark_pnl = fraction_of(position.basis, drift);
                let mark_pnl = position.mark_pnl;
                state.pending.push(BrokerEvent::Mark {
                    position_id: id,
                    mark_pnl,
                });
            }
        }
    }
}

fn fraction_of(amount: Decimal, fraction: f64) -> Decimal {
    let factor = Decimal::from_f64_retain(fraction).unwrap_or(Decimal::ZERO);
    (amount * factor).round_dp(2)
}

fn settle_locked(state: &mut PaperState, position_id: Uuid, realized_pnl: Decimal) {
    if let Some(position) = state.open.remove(&position_id) {
        debug!(%position_id, symbol = %position.symbol, %realized_pnl, "Paper position settled");
        state.pending.push(BrokerEvent::Closed(CloseReport {
            position_id,
            realized_pnl,
            closed_at: Utc::now(),
        }));
    }
}

#[async_trait]
impl BrokerGateway for PaperBroker {
    async fn submit(&self, order: &OrderRequest) -> Result<Fill, BrokerError> {
        let delay = *self.submit_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(fill) = state.fills.get(&order.trade_id) {
            return Ok(fill.clone());
        }
        if state.fail_submissions > 0 {
            state.fail_submissions -= 1;
            return Err(BrokerError::Unavailable("paper broker offline".to_string()));
        }
        if order.notional <= Decimal::ZERO {
            return Err(BrokerError::Rejected(format!(
                "non-positive notional {}",
                order.notional
            )));
        }

        let fill = Fill {
            trade_id: order.trade_id,
            symbol: order.symbol.clone(),
            basis: order.notional + self.commission(order.notional),
            filled_at: Utc::now(),
        };
        state.open.insert(
            order.trade_id,
            PaperPosition {
                symbol: order.symbol.clone(),
                basis: fill.basis,
                mark_pnl: Decimal::ZERO,
                age_polls: 0,
            },
        );
        state.fills.insert(order.trade_id, fill.clone());

        info!(
            trade_id = %order.trade_id,
            symbol = %order.symbol,
            strategy = %order.strategy_id,
            basis = %fill.basis,
            "Paper order filled"
        );
        Ok(fill)
    }

    async fn close(&self, position: &Position) -> Result<CloseReport, BrokerError> {
        let mut state = self.state.lock();
        if state.fail_closes > 0 {
            state.fail_closes -= 1;
            return Err(BrokerError::Unavailable("paper broker offline".to_string()));
        }

        // Already settled on the broker side: report the last known mark.
        let realized_pnl = state
            .open
            .remove(&position.id)
            .map_or(position.current_mark_pnl, |p| p.mark_pnl);

        Ok(CloseReport {
            position_id: position.id,
            realized_pnl,
            closed_at: Utc::now(),
        })
    }

    async fn poll_events(&self) -> Result<Vec<BrokerEvent>, BrokerError> {
        let mut state = self.state.lock();
        self.simulate(&mut state);
        Ok(std::mem::take(&mut state.pending))
    }
}
