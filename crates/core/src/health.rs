use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PilotError;

/// Where a trading process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Host {
    Local,
    Cloud,
}

impl Host {
    /// The other host in the pair.
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Local => Self::Cloud,
            Self::Cloud => Self::Local,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Host {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cloud" => Ok(Self::Cloud),
            other => Err(PilotError::InvalidRequest(format!("unknown host '{other}'"))),
        }
    }
}

/// Liveness of the trading loop as seen by the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSignal {
    pub last_heartbeat: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub active_host: Host,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_is_symmetric() {
        assert_eq!(Host::Local.peer(), Host::Cloud);
        assert_eq!(Host::Cloud.peer().peer(), Host::Cloud);
        assert_eq!("cloud".parse::<Host>().unwrap(), Host::Cloud);
    }
}
