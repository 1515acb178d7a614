use crate::error::BrokerError;
use crate::events::{BrokerEvent, CloseReport, Fill, OrderRequest};
use crate::health::Host;
use crate::market::{CandidateTrade, MarketSnapshot};
use crate::position::Position;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Probability-of-profit model behind the edge filter.
///
/// Scoring runs inside the admission critical section, so implementations
/// must be cheap and must not block on I/O. Any error rejects the candidate.
pub trait EdgeScorer: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the candidate cannot be scored.
    fn score(&self, candidate: &CandidateTrade) -> Result<f64>;
}

impl<F> EdgeScorer for F
where
    F: Fn(&CandidateTrade) -> Result<f64> + Send + Sync,
{
    fn score(&self, candidate: &CandidateTrade) -> Result<f64> {
        self(candidate)
    }
}

#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Submits an order and waits for its fill.
    async fn submit(&self, order: &OrderRequest) -> Result<Fill, BrokerError>;

    /// Closes a position at market.
    async fn close(&self, position: &Position) -> Result<CloseReport, BrokerError>;

    /// Drains mark and settlement updates since the last call.
    async fn poll_events(&self) -> Result<Vec<BrokerEvent>, BrokerError>;
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn snapshot(&self) -> Result<MarketSnapshot>;
}

/// Current owner of the trading lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

/// Externally coordinated lock guaranteeing one trading writer.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Takes the lease if it is free, expired, or already ours.
    async fn try_acquire(&self, holder: &str, ttl: Duration) -> Result<bool>;

    /// Extends the lease; `false` means another holder owns it.
    async fn renew(&self, holder: &str, ttl: Duration) -> Result<bool>;

    /// Gives the lease up if held by `holder`.
    async fn release(&self, holder: &str) -> Result<()>;

    async fn current(&self) -> Result<Option<LeaseInfo>>;
}

/// Channel to the alternate host.
#[async_trait]
pub trait PeerNotifier: Send + Sync {
    /// Asks the peer to take over active trading from `from`.
    async fn request_takeover(&self, from: Host) -> Result<()>;
}
