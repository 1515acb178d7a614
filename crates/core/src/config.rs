use crate::account::{RiskBudget, TradingMode};
use crate::health::Host;
use crate::position_sizing::SizingConfig;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub account: AccountConfig,
    pub risk: RiskConfig,
    pub sizing: SizingConfig,
    pub trading: TradingConfig,
    pub broker: BrokerConfig,
    pub watchdog: WatchdogConfig,
    pub failover: FailoverConfig,
    pub database: DatabaseConfig,
    pub strategies: StrategiesConfig,
}

impl AppConfig {
    /// Rejects configurations the desk cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending section.
    pub fn validate(&self) -> Result<()> {
        self.risk.budget().validate().context("invalid [risk] section")?;

        if !(0.0..=1.0).contains(&self.risk.min_edge_probability) {
            anyhow::bail!(
                "risk.min_edge_probability must be within [0, 1], got {}",
                self.risk.min_edge_probability
            );
        }
        if !(self.risk.weekly_loss_limit > 0.0 && self.risk.weekly_loss_limit <= 1.0) {
            anyhow::bail!(
                "risk.weekly_loss_limit must be within (0, 1], got {}",
                self.risk.weekly_loss_limit
            );
        }
        if self.account.initial_capital < Decimal::ZERO {
            anyhow::bail!("account.initial_capital must not be negative");
        }
        if self.trading.tick_interval_secs == 0 {
            anyhow::bail!("trading.tick_interval_secs must be positive");
        }
        if self.watchdog.stale_threshold_secs <= self.watchdog.check_interval_secs {
            anyhow::bail!("watchdog.stale_threshold_secs must exceed watchdog.check_interval_secs");
        }
        if self.watchdog.lease_ttl_secs <= self.watchdog.check_interval_secs {
            anyhow::bail!("watchdog.lease_ttl_secs must exceed watchdog.check_interval_secs");
        }
        if self.broker.max_attempts == 0 {
            anyhow::bail!("broker.max_attempts must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Starting balance when no persisted snapshot exists.
    pub initial_capital: Decimal,
    pub mode: TradingMode,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::from(5000),
            mode: TradingMode::Income,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub daily_limit: f64,
    pub per_trade_limit: f64,
    pub circuit_breaker_move_pct: f64,
    pub min_edge_probability: f64,
    /// Realized loss for the week, as a fraction of balance, at which new
    /// entries stop until the weekly reset.
    pub weekly_loss_limit: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        let budget = RiskBudget::default();
        Self {
            daily_limit: budget.daily_limit_fraction,
            per_trade_limit: budget.per_trade_limit_fraction,
            circuit_breaker_move_pct: budget.circuit_breaker_move_pct,
            min_edge_probability: 0.55,
            weekly_loss_limit: 0.05,
        }
    }
}

impl RiskConfig {
    #[must_use]
    pub const fn budget(&self) -> RiskBudget {
        RiskBudget {
            daily_limit_fraction: self.daily_limit,
            per_trade_limit_fraction: self.per_trade_limit,
            circuit_breaker_move_pct: self.circuit_breaker_move_pct,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub tick_interval_secs: u64,
    /// Upper bound on gathering a tick's inputs.
    pub tick_timeout_secs: u64,
    pub market_data_timeout_secs: u64,
    /// Skip candidate generation outside regular US equity hours.
    pub respect_market_hours: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            tick_timeout_secs: 20,
            market_data_timeout_secs: 10,
            respect_market_hours: true,
        }
    }
}

impl TradingConfig {
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    #[must_use]
    pub const fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.tick_timeout_secs)
    }

    #[must_use]
    pub const fn market_data_timeout(&self) -> Duration {
        Duration::from_secs(self.market_data_timeout_secs)
    }
}

/// Retry policy for broker submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub attempt_timeout_secs: u64,
    /// Commission charged by the paper broker, in basis points of notional.
    pub paper_commission_bps: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 5_000,
            attempt_timeout_secs: 10,
            paper_commission_bps: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub check_interval_secs: u64,
    pub stale_threshold_secs: u64,
    /// Local restarts attempted before failing over.
    pub max_restarts: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub lease_ttl_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 5,
            stale_threshold_secs: 30,
            max_restarts: 3,
            initial_backoff_secs: 1,
            max_backoff_secs: 30,
            lease_ttl_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Host this process runs on.
    pub host: Host,
    /// Identity written into the lease.
    pub holder_id: String,
    /// Base URL of the alternate host's control surface.
    pub peer_url: Option<String>,
    /// Coordination store shared by both hosts.
    pub lease_url: String,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            host: Host::Local,
            holder_id: "robopilot-local".to_string(),
            peer_url: None,
            lease_url: "sqlite://data/lease.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/robopilot.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StrategiesConfig {
    pub income: IncomeConfig,
    pub turbo: TurboConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncomeConfig {
    pub symbols: Vec<String>,
    pub min_dte: u32,
    pub max_dte: u32,
    pub max_daily_trades: u32,
    /// Risk each candidate declares, as a fraction of balance.
    pub estimated_risk: f64,
    pub high_iv_rank: f64,
    pub mid_iv_rank: f64,
}

impl Default for IncomeConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["SPY".to_string(), "QQQ".to_string(), "IWM".to_string()],
            min_dte: 1,
            max_dte: 7,
            max_daily_trades: 2,
            estimated_risk: 0.01,
            high_iv_rank: 70.0,
            mid_iv_rank: 40.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurboConfig {
    pub symbol: String,
    pub max_daily_trades: u32,
    pub estimated_risk: f64,
    pub condor_max_vix: f64,
    pub condor_max_range_pct: f64,
    pub spread_max_vix: f64,
}

impl Default for TurboConfig {
    fn default() -> Self {
        Self {
            symbol: "SPY".to_string(),
            max_daily_trades: 1,
            estimated_risk: 0.01,
            condor_max_vix: 25.0,
            condor_max_range_pct: 1.5,
            spread_max_vix: 30.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::{Format, Toml};
    use figment::Figment;

    #[test]
    fn test_default_config_validates() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_risk_section() {
        let mut config = AppConfig::default();
        config.risk.per_trade_limit = 0.10;
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("per_trade_limit"));
    }

    #[test]
    fn test_validate_rejects_weekly_loss_limit_out_of_range() {
        let mut config = AppConfig::default();
        config.risk.weekly_loss_limit = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("weekly_loss_limit"));

        config.risk.weekly_loss_limit = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_watchdog_thresholds() {
        let mut config = AppConfig::default();
        config.watchdog.stale_threshold_secs = config.watchdog.check_interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml = r#"
            [risk]
            daily_limit = 0.04

            [failover]
            host = "cloud"
        "#;
        let config: AppConfig = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .unwrap();

        assert!((config.risk.daily_limit - 0.04).abs() < f64::EPSILON);
        assert!((config.risk.per_trade_limit - 0.01).abs() < f64::EPSILON);
        assert_eq!(config.failover.host, Host::Cloud);
        assert_eq!(config.strategies.income.symbols.len(), 3);
    }
}
