//! Market data sources for paper trading and tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use robopilot_core::{MarketDataSource, MarketSnapshot, Trend};
use std::collections::VecDeque;
use std::time::Duration;

/// Replays queued snapshots, then repeats the last one.
pub struct ScriptedFeed {
    queue: Mutex<VecDeque<MarketSnapshot>>,
    last: Mutex<Option<MarketSnapshot>>,
    delay: Mutex<Duration>,
}

impl ScriptedFeed {
    #[must_use]
    pub fn new(snapshots: impl IntoIterator<Item = MarketSnapshot>) -> Self {
        Self {
            queue: Mutex::new(snapshots.into_iter().collect()),
            last: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn push(&self, snapshot: MarketSnapshot) {
        self.queue.lock().push_back(snapshot);
    }

    /// Stalls every read, simulating a hung data vendor.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }
}

#[async_trait]
impl MarketDataSource for ScriptedFeed {
    async fn snapshot(&self) -> Result<MarketSnapshot> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let next = self.queue.lock().pop_front();
        let mut last = self.last.lock();
        if let Some(snapshot) = next {
            *last = Some(snapshot);
        }
        last.clone()
            .map(|mut s| {
                s.timestamp = Utc::now();
                s
            })
            .ok_or_else(|| anyhow::anyhow!("scripted feed has no snapshots"))
    }
}

/// Seeded random walk over volatility and market move, for paper runs.
pub struct SyntheticFeed {
    state: Mutex<SyntheticState>,
}

struct SyntheticState {
    rng: StdRng,
    vix: f64,
    iv_rank: f64,
    market_move: f64,
}

impl SyntheticFeed {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(SyntheticState {
                rng: StdRng::seed_from_u64(seed),
                vix: 16.0,
                iv_rank: 55.0,
                market_move: 0.0,
            }),
        }
    }
}

#[async_trait]
impl MarketDataSource for SyntheticFeed {
    async fn snapshot(&self) -> Result<MarketSnapshot> {
        let mut s = self.state.lock();

        let vix_step: f64 = s.rng.gen_range(-1.0..1.0);
        let iv_step: f64 = s.rng.gen_range(-5.0..5.0);
        let move_step: f64 = s.rng.gen_range(-0.003..0.003);
        s.vix = (s.vix + vix_step).clamp(9.0, 45.0);
        s.iv_rank = (s.iv_rank + iv_step).clamp(0.0, 100.0);
        s.market_move = (s.market_move + move_step).clamp(-0.05, 0.05);

        let trend = if s.market_move > 0.004 {
            Trend::Bullish
        } else if s.market_move < -0.004 {
            Trend::Bearish
        } else {
            Trend::Neutral
        };
        let range: f64 = s.rng.gen_range(0.4..2.0);

        Ok(MarketSnapshot {
            timestamp: Utc::now(),
            vix: s.vix,
            iv_rank: s.iv_rank,
            daily_range_pct: range,
            trend,
            market_move_abs_pct: s.market_move.abs(),
            news_symbols: Default::default(),
        })
    }
}
