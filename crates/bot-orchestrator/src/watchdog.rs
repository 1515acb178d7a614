//! Liveness supervision and cross-host failover.
//!
//! The watchdog compares the loop heartbeat against a staleness threshold.
//! A stale heartbeat triggers a local restart with capped exponential
//! backoff; once restarts are exhausted the local loop is halted, the lease
//! released and the peer asked to take over. Halting happens before the
//! peer is told, so both hosts are never active at once.
//!
//! A writer that cannot confirm its lease stands down one check interval
//! before the lease would lapse, whether the store says someone else holds
//! it or the store cannot be reached at all.

use crate::commands::HaltReason;
use crate::health::HealthMonitor;
use crate::supervisor::Supervised;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use robopilot_core::{LeaseStore, PeerNotifier, ReasonCode, WatchdogConfig};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogSettings {
    pub check_interval: Duration,
    pub stale_threshold: Duration,
    pub max_restarts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub lease_ttl: Duration,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self::from(&WatchdogConfig::default())
    }
}

impl From<&WatchdogConfig> for WatchdogSettings {
    fn from(config: &WatchdogConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(config.check_interval_secs),
            stale_threshold: Duration::from_secs(config.stale_threshold_secs),
            max_restarts: config.max_restarts,
            initial_backoff: Duration::from_secs(config.initial_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            lease_ttl: Duration::from_secs(config.lease_ttl_secs),
        }
    }
}

impl WatchdogSettings {
    /// Delay before the given 1-based restart attempt.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1u32 << exp).min(self.max_backoff)
    }
}

/// What one watchdog check decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WatchdogAction {
    Healthy,
    Restart { attempt: u32, backoff: Duration },
    Failover { attempts: u32 },
    /// Loop is halted; nothing to supervise.
    Idle,
    /// Peer is active; this host only watches for a free lease.
    Standby,
}

pub struct Watchdog {
    settings: WatchdogSettings,
    health: Arc<HealthMonitor>,
    target: Arc<dyn Supervised>,
    lease: Arc<dyn LeaseStore>,
    notifier: Arc<dyn PeerNotifier>,
    holder_id: String,
    takeover: Arc<Notify>,
    /// Last time the store confirmed we hold the lease.
    lease_confirmed: Mutex<Option<DateTime<Utc>>>,
}

impl Watchdog {
    #[must_use]
    pub fn new(
        settings: WatchdogSettings,
        health: Arc<HealthMonitor>,
        target: Arc<dyn Supervised>,
        lease: Arc<dyn LeaseStore>,
        notifier: Arc<dyn PeerNotifier>,
        holder_id: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            health,
            target,
            lease,
            notifier,
            holder_id: holder_id.into(),
            takeover: Arc::new(Notify::new()),
            lease_confirmed: Mutex::new(None),
        }
    }

    /// Signalled by the control surface when the peer asks us to take over.
    #[must_use]
    pub fn takeover_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.takeover)
    }

    /// Decides what to do about the heartbeat as of `now`. Counts a failure
    /// for every stale check.
    pub fn assess(&self, now: DateTime<Utc>) -> WatchdogAction {
        if self.target.is_halted() {
            return WatchdogAction::Idle;
        }
        if !self.health.is_writer() {
            return WatchdogAction::Standby;
        }

        let age = self.health.heartbeat_age(now);
        let threshold = chrono::Duration::from_std(self.settings.stale_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        if age <= threshold {
            if self.health.signal().consecutive_failures > 0 {
                info!("Heartbeat recovered");
                self.health.reset_failures();
            }
            return WatchdogAction::Healthy;
        }

        let failures = self.health.record_failure();
        warn!(
            age_secs = age.num_seconds(),
            consecutive_failures = failures,
            "Trading loop heartbeat is stale"
        );
        if failures <= self.settings.max_restarts {
            WatchdogAction::Restart {
                attempt: failures,
                backoff: self.settings.backoff(failures),
            }
        } else {
            WatchdogAction::Failover {
                attempts: failures - 1,
            }
        }
    }

    /// One supervision cycle: keep the lease, assess, act.
    pub async fn run_once(&self, now: DateTime<Utc>) -> WatchdogAction {
        if self.health.is_writer() && !self.target.is_halted() {
            self.keep_lease(now).await;
        }

        let action = self.assess(now);
        match action {
            WatchdogAction::Healthy | WatchdogAction::Idle => {}
            WatchdogAction::Restart { attempt, backoff } => {
                tokio::time::sleep(backoff).await;
                match self.target.restart().await {
                    Ok(()) => info!(attempt, "Trading loop restarted by watchdog"),
                    Err(e) => warn!(attempt, error = %e, "Watchdog restart failed"),
                }
            }
            WatchdogAction::Failover { attempts } => self.fail_over(attempts).await,
            WatchdogAction::Standby => self.try_take_over(now).await,
        }
        action
    }

    async fn keep_lease(&self, now: DateTime<Utc>) {
        match self.lease.renew(&self.holder_id, self.settings.lease_ttl).await {
            Ok(true) => {
                *self.lease_confirmed.lock() = Some(now);
            }
            Ok(false) => {
                // someone else holds it: stop writing immediately
                warn!(holder = %self.holder_id, "Trading lease lost, standing down");
                self.stand_down();
            }
            Err(e) => {
                let confirmed = *self.lease_confirmed.lock().get_or_insert(now);
                let unconfirmed_for = now - confirmed;
                if unconfirmed_for >= self.renewal_deadline() {
                    error!(
                        error = %e,
                        unconfirmed_secs = unconfirmed_for.num_seconds(),
                        "Trading lease could not be renewed before expiry, standing down"
                    );
                    self.stand_down();
                } else {
                    warn!(error = %e, unconfirmed_secs = unconfirmed_for.num_seconds(), "Lease renewal failed");
                }
            }
        }
    }

    /// How long renewals may fail before the lease is treated as lost: the
    /// TTL less one check interval, so the next check cannot land after
    /// expiry.
    fn renewal_deadline(&self) -> chrono::Duration {
        let window = self.settings.lease_ttl.saturating_sub(self.settings.check_interval);
        chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn stand_down(&self) {
        *self.lease_confirmed.lock() = None;
        self.health.set_active_host(self.health.own_host().peer());
    }

    async fn fail_over(&self, attempts: u32) {
        let own = self.health.own_host();
        error!(
            code = %ReasonCode::WatchdogFailoverExhausted,
            attempts,
            peer = %own.peer(),
            "Local restarts exhausted, failing over"
        );

        self.target.halt(HaltReason::FailoverExhausted);
        self.health.set_active_host(own.peer());
        if let Err(e) = self.lease.release(&self.holder_id).await {
            warn!(error = %e, "Failed to release trading lease during failover");
        }
        if let Err(e) = self.notifier.request_takeover(own).await {
            // the peer still finds the free lease on its own poll
            warn!(error = %e, "Peer takeover notification failed");
        }
    }

    async fn try_take_over(&self, now: DateTime<Utc>) {
        match self.lease.try_acquire(&self.holder_id, self.settings.lease_ttl).await {
            Ok(true) => {
                info!(holder = %self.holder_id, "Trading lease acquired, becoming active");
                *self.lease_confirmed.lock() = Some(now);
                self.health.set_active_host(self.health.own_host());
                self.health.reset_failures();
                self.health.beat(Utc::now());
            }
            Ok(false) => debug!("Peer still holds the trading lease"),
            Err(e) => warn!(error = %e, "Lease acquisition failed"),
        }
    }

    /// Runs checks on the configured interval, or immediately on a takeover
    /// request, until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.check_interval);
        info!(
            stale_threshold = ?self.settings.stale_threshold,
            max_restarts = self.settings.max_restarts,
            "Watchdog started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = self.takeover.notified() => {
                    info!("Takeover requested by peer");
                }
                _ = shutdown.changed() => break,
            }
            self.run_once(Utc::now()).await;
        }

        info!("Watchdog stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::InMemoryLeaseStore;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use robopilot_core::{Host, LeaseInfo};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Loop stand-in whose heartbeat never recovers.
    #[derive(Default)]
    struct HungLoop {
        restarts: AtomicU32,
        halted: AtomicBool,
        halt_reasons: Mutex<Vec<HaltReason>>,
    }

    #[async_trait]
    impl Supervised for HungLoop {
        async fn restart(&self) -> Result<()> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn halt(&self, reason: HaltReason) -> bool {
            self.halt_reasons.lock().push(reason);
            !self.halted.swap(true, Ordering::SeqCst)
        }

        fn is_halted(&self) -> bool {
            self.halted.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingPeer {
        requests: Mutex<Vec<Host>>,
    }

    #[async_trait]
    impl PeerNotifier for RecordingPeer {
        async fn request_takeover(&self, from: Host) -> Result<()> {
            self.requests.lock().push(from);
            Ok(())
        }
    }

    /// Lease store whose backend is unreachable.
    struct UnreachableLease;

    #[async_trait]
    impl LeaseStore for UnreachableLease {
        async fn try_acquire(&self, _holder: &str, _ttl: Duration) -> Result<bool> {
            bail!("lease database unreachable")
        }

        async fn renew(&self, _holder: &str, _ttl: Duration) -> Result<bool> {
            bail!("lease database unreachable")
        }

        async fn release(&self, _holder: &str) -> Result<()> {
            bail!("lease database unreachable")
        }

        async fn current(&self) -> Result<Option<LeaseInfo>> {
            bail!("lease database unreachable")
        }
    }

    struct Harness {
        watchdog: Watchdog,
        target: Arc<HungLoop>,
        health: Arc<HealthMonitor>,
        lease: Arc<InMemoryLeaseStore>,
        peer: Arc<RecordingPeer>,
        start: DateTime<Utc>,
    }

    fn settings() -> WatchdogSettings {
        WatchdogSettings {
            check_interval: Duration::from_secs(5),
            stale_threshold: Duration::from_secs(30),
            max_restarts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            lease_ttl: Duration::from_secs(15),
        }
    }

    async fn harness(own: Host, active: Host) -> Harness {
        let start = Utc::now();
        let target = Arc::new(HungLoop::default());
        let health = Arc::new(HealthMonitor::new(own, active, start));
        let lease = Arc::new(InMemoryLeaseStore::new());
        let peer = Arc::new(RecordingPeer::default());
        if own == active {
            assert!(lease.try_acquire("local", Duration::from_secs(15)).await.unwrap());
        }

        let watchdog = Watchdog::new(
            settings(),
            Arc::clone(&health),
            target.clone(),
            lease.clone(),
            peer.clone(),
            "local",
        );
        Harness {
            watchdog,
            target,
            health,
            lease,
            peer,
            start,
        }
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    // ==================== Backoff Tests ====================

    #[test]
    fn test_backoff_doubles_and_caps() {
        let s = settings();
        assert_eq!(s.backoff(1), Duration::from_secs(1));
        assert_eq!(s.backoff(2), Duration::from_secs(2));
        assert_eq!(s.backoff(3), Duration::from_secs(4));
        assert_eq!(s.backoff(10), Duration::from_secs(30));
    }

    // ==================== Supervision Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_fresh_heartbeat_is_healthy() {
        let h = harness(Host::Local, Host::Local).await;
        assert_eq!(h.watchdog.run_once(h.start + secs(10)).await, WatchdogAction::Healthy);
        assert_eq!(h.target.restarts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_heartbeats_exhaust_restarts_then_fail_over() {
        let h = harness(Host::Local, Host::Local).await;

        let mut actions = Vec::new();
        for i in 1..=5 {
            actions.push(h.watchdog.run_once(h.start + secs(30 + i * 5)).await);
        }

        assert!(matches!(actions[0], WatchdogAction::Restart { attempt: 1, .. }));
        assert!(matches!(actions[1], WatchdogAction::Restart { attempt: 2, .. }));
        assert!(matches!(actions[2], WatchdogAction::Restart { attempt: 3, .. }));
        assert_eq!(actions[3], WatchdogAction::Failover { attempts: 3 });
        assert_eq!(actions[4], WatchdogAction::Idle);

        assert_eq!(h.target.restarts.load(Ordering::SeqCst), 3);
        assert!(h.target.is_halted());
        assert_eq!(*h.target.halt_reasons.lock(), vec![HaltReason::FailoverExhausted]);

        // single writer: this host stood down and gave up the lease
        assert_eq!(h.health.signal().active_host, Host::Cloud);
        assert!(h.lease.current().await.unwrap().is_none());
        assert_eq!(*h.peer.requests.lock(), vec![Host::Local]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovered_heartbeat_resets_failures() {
        let h = harness(Host::Local, Host::Local).await;

        h.watchdog.run_once(h.start + secs(40)).await;
        assert_eq!(h.health.signal().consecutive_failures, 1);

        h.health.beat(h.start + secs(41));
        assert_eq!(h.watchdog.run_once(h.start + secs(45)).await, WatchdogAction::Healthy);
        assert_eq!(h.health.signal().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_lease_demotes_to_standby() {
        let h = harness(Host::Local, Host::Local).await;
        h.lease.release("local").await.unwrap();
        assert!(h.lease.try_acquire("cloud", Duration::from_secs(15)).await.unwrap());

        assert_eq!(h.watchdog.run_once(h.start + secs(1)).await, WatchdogAction::Standby);
        assert!(!h.health.is_writer());
        assert!(!h.target.is_halted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_standby_takes_free_lease() {
        let h = harness(Host::Local, Host::Cloud).await;

        assert_eq!(h.watchdog.run_once(Utc::now()).await, WatchdogAction::Standby);
        assert!(h.health.is_writer());
        assert_eq!(h.lease.current().await.unwrap().unwrap().holder, "local");
    }

    #[tokio::test(start_paused = true)]
    async fn test_standby_waits_while_peer_holds_lease() {
        let h = harness(Host::Local, Host::Cloud).await;
        assert!(h.lease.try_acquire("cloud", Duration::from_secs(15)).await.unwrap());

        h.watchdog.run_once(Utc::now()).await;
        assert!(!h.health.is_writer());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrenewable_lease_stands_down_before_expiry() {
        let start = Utc::now();
        let health = Arc::new(HealthMonitor::new(Host::Local, Host::Local, start));
        let target = Arc::new(HungLoop::default());
        let watchdog = Watchdog::new(
            settings(),
            Arc::clone(&health),
            target.clone(),
            Arc::new(UnreachableLease),
            Arc::new(RecordingPeer::default()),
            "local",
        );

        let mut writer_at = Vec::new();
        for i in 1..=12 {
            let now = start + secs(i * 5);
            // loop stays healthy; only the lease is in trouble
            health.beat(now);
            watchdog.run_once(now).await;
            writer_at.push(health.is_writer());
        }

        // first failure at 5s, TTL 15s less one 5s check: gone by 15s
        assert_eq!(&writer_at[..3], &[true, true, false]);
        assert!(!health.is_writer());
        assert!(writer_at[3..].iter().all(|w| !w));
        assert!(!target.is_halted());
        assert_eq!(target.restarts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewed_lease_keeps_writer() {
        let h = harness(Host::Local, Host::Local).await;
        for i in 1..=12 {
            let now = h.start + secs(i * 5);
            h.health.beat(now);
            assert_eq!(h.watchdog.run_once(now).await, WatchdogAction::Healthy);
        }
        assert!(h.health.is_writer());
    }
}
