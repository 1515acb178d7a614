use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use robopilot_core::{HealthSignal, Host};
use tracing::info;

/// Heartbeat and active-host record shared by the loop and the watchdog.
#[derive(Debug)]
pub struct HealthMonitor {
    own_host: Host,
    signal: RwLock<HealthSignal>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(own_host: Host, active_host: Host, now: DateTime<Utc>) -> Self {
        Self {
            own_host,
            signal: RwLock::new(HealthSignal {
                last_heartbeat: now,
                consecutive_failures: 0,
                active_host,
            }),
        }
    }

    #[must_use]
    pub const fn own_host(&self) -> Host {
        self.own_host
    }

    /// Called by the loop on every tick, whatever its state.
    pub fn beat(&self, now: DateTime<Utc>) {
        let mut signal = self.signal.write();
        if now > signal.last_heartbeat {
            signal.last_heartbeat = now;
        }
    }

    #[must_use]
    pub fn signal(&self) -> HealthSignal {
        *self.signal.read()
    }

    #[must_use]
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.signal.read().last_heartbeat
    }

    /// True while this process holds active-trading responsibility.
    #[must_use]
    pub fn is_writer(&self) -> bool {
        self.signal.read().active_host == self.own_host
    }

    pub fn set_active_host(&self, host: Host) {
        let mut signal = self.signal.write();
        if signal.active_host != host {
            info!(from = %signal.active_host, to = %host, "Active host changed");
            signal.active_host = host;
        }
    }

    pub fn record_failure(&self) -> u32 {
        let mut signal = self.signal.write();
        signal.consecutive_failures += 1;
        signal.consecutive_failures
    }

    pub fn reset_failures(&self) {
        self.signal.write().consecutive_failures = 0;
    }
}
