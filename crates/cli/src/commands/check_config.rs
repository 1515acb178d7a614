//! Validates configuration without starting the desk.

use super::load_config;
use anyhow::Result;
use clap::Args;
use robopilot_core::AppConfig;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: PathBuf,

    /// Profile overlay, e.g. `cloud` for `Config.cloud.toml`
    #[arg(short, long, env = "PILOT_PROFILE")]
    pub profile: Option<String>,
}

/// Loads the layered configuration and prints the settings that matter at startup.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or fails validation.
pub fn run_check_config(args: &CheckConfigArgs) -> Result<()> {
    let config = load_config(&args.config, args.profile.as_deref())?;
    for line in summarize(&config) {
        println!("{line}");
    }
    println!("Configuration OK");
    Ok(())
}

fn summarize(config: &AppConfig) -> Vec<String> {
    let risk = config.risk.budget();
    let failover = &config.failover;
    vec![
        format!("server        {}:{}", config.server.host, config.server.port),
        format!(
            "account       capital={} mode={}",
            config.account.initial_capital, config.account.mode
        ),
        format!(
            "risk          daily={:.2}% per_trade={:.2}% breaker={:.2}% min_edge={:.2} weekly_loss={:.2}%",
            risk.daily_limit_fraction * 100.0,
            risk.per_trade_limit_fraction * 100.0,
            risk.circuit_breaker_move_pct * 100.0,
            config.risk.min_edge_probability,
            config.risk.weekly_loss_limit * 100.0
        ),
        format!(
            "trading       tick={}s timeout={}s market_hours={}",
            config.trading.tick_interval_secs,
            config.trading.tick_timeout_secs,
            config.trading.respect_market_hours
        ),
        format!(
            "watchdog      check={}s stale={}s restarts={} lease_ttl={}s",
            config.watchdog.check_interval_secs,
            config.watchdog.stale_threshold_secs,
            config.watchdog.max_restarts,
            config.watchdog.lease_ttl_secs
        ),
        format!(
            "failover      host={} holder={} peer={}",
            failover.host,
            failover.holder_id,
            failover.peer_url.as_deref().unwrap_or("-")
        ),
        format!("database      {}", config.database.url),
    ]
}
