//! Bounded retry around broker calls.
//!
//! Only transport failures (`Unavailable`, `Timeout`) are retried. Every
//! attempt runs under its own timeout and backoff doubles up to a cap, so a
//! submission always finishes in bounded time. Retried submissions reuse the
//! order's `trade_id`, which gateways treat as the client order id.

use robopilot_core::{BrokerConfig, BrokerError, BrokerGateway, CloseReport, Fill, OrderRequest, Position};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&BrokerConfig::default())
    }
}

impl From<&BrokerConfig> for RetryPolicy {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given 1-based failed attempt.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

/// Runs `op` until it succeeds, fails permanently, or attempts run out.
///
/// # Errors
///
/// Returns the last error seen, or the first non-retryable one.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = BrokerError::Unavailable(format!("{op_name}: no attempt made"));

    for attempt in 1..=attempts {
        let error = match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_retryable() => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => BrokerError::Timeout(policy.attempt_timeout),
        };

        if attempt < attempts {
            let delay = policy.backoff(attempt);
            warn!(
                op = op_name,
                attempt,
                max_attempts = attempts,
                error = %error,
                "Broker call failed, retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
        }
        last_error = error;
    }

    Err(last_error)
}

/// # Errors
///
/// Returns the broker error once retries are exhausted.
pub async fn submit_with_retry(
    gateway: &dyn BrokerGateway,
    order: &OrderRequest,
    policy: &RetryPolicy,
) -> Result<Fill, BrokerError> {
    with_retry(policy, "submit", || gateway.submit(order)).await
}

/// # Errors
///
/// Returns the broker error once retries are exhausted.
pub async fn close_with_retry(
    gateway: &dyn BrokerGateway,
    position: &Position,
    policy: &RetryPolicy,
) -> Result<CloseReport, BrokerError> {
    with_retry(policy, "close", || gateway.close(position)).await
}
