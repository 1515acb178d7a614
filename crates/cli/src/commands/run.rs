//! Runs the trading desk: state restore, lease, loop, watchdog and control API.

use super::load_config;
use anyhow::{Context, Result};
use clap::Args;
use robopilot_core::{ConfigWatcher, LeaseStore, PeerNotifier};
use robopilot_execution::{PaperBroker, SettlementModel, SyntheticFeed};
use robopilot_orchestrator::{
    spawn_budget_sync, spawn_persistence, Collaborators, DayRollover, HttpPeerNotifier,
    MarketClock, NoopPeerNotifier, PilotRuntime, SqliteLeaseStore, SqliteStateStore,
    WatchdogSettings,
};
use robopilot_web_api::ApiServer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const ROLLOVER_CHECK_EVERY: Duration = Duration::from_secs(30);

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: PathBuf,

    /// Profile overlay, e.g. `cloud` for `Config.cloud.toml`
    #[arg(short, long, env = "PILOT_PROFILE")]
    pub profile: Option<String>,

    /// Seed for the synthetic market feed and paper settlement
    #[arg(long, default_value_t = 7)]
    pub seed: u64,
}

/// Runs until SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if configuration, the state database or the lease store
/// cannot be opened.
#[allow(clippy::too_many_lines)]
pub async fn run_desk(args: RunArgs) -> Result<()> {
    tracing::info!("Starting trading desk with config: {}", args.config.display());
    let config = load_config(&args.config, args.profile.as_deref())?;

    ensure_sqlite_parent(&config.database.url)?;
    ensure_sqlite_parent(&config.failover.lease_url)?;

    let store = SqliteStateStore::new(&config.database.url, config.database.max_connections).await?;
    let snapshot = store.load_snapshot().await?;
    let positions = store.load_positions().await?;
    match &snapshot {
        Some(s) => tracing::info!(
            balance = %s.balance,
            mode = %s.mode,
            open_positions = positions.len(),
            "Restored account from database"
        ),
        None => tracing::info!("No persisted account, starting fresh"),
    }

    let lease = Arc::new(SqliteLeaseStore::new(&config.failover.lease_url).await?);
    let settings = WatchdogSettings::from(&config.watchdog);
    let active = lease
        .try_acquire(&config.failover.holder_id, settings.lease_ttl)
        .await
        .context("failed to query trading lease")?;
    if active {
        tracing::info!(host = %config.failover.host, "Acquired trading lease, starting active");
    } else {
        tracing::warn!(host = %config.failover.host, "Trading lease held elsewhere, starting in standby");
    }

    let notifier: Arc<dyn PeerNotifier> = match &config.failover.peer_url {
        Some(url) => Arc::new(HttpPeerNotifier::new(url.clone())?),
        None => Arc::new(NoopPeerNotifier),
    };
    let broker = PaperBroker::new(config.broker.paper_commission_bps).with_settlement(SettlementModel {
        seed: args.seed,
        ..SettlementModel::default()
    });

    let runtime = PilotRuntime::build(
        &config,
        Collaborators {
            broker: Arc::new(broker),
            market: Arc::new(SyntheticFeed::new(args.seed)),
            lease,
            notifier,
        },
        snapshot.as_ref(),
        active,
    );
    let desk = Arc::clone(&runtime.deps.desk);
    desk.restore_positions(positions);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let persistence = spawn_persistence(store.clone(), Arc::clone(&desk));

    let (watcher, config_rx) = ConfigWatcher::new(config.clone(), &args.config);
    let watcher = watcher.with_profile(args.profile.clone());
    let budget_sync = spawn_budget_sync(Arc::clone(&desk), config_rx);
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watcher.watch().await {
            tracing::error!("Config watcher stopped: {:#}", e);
        }
    });

    let rollover = DayRollover::new(Arc::clone(&desk), MarketClock::default(), Some(store));
    let rollover_handle = tokio::spawn(rollover.run(ROLLOVER_CHECK_EVERY, shutdown_rx.clone()));

    let supervisor = Arc::clone(&runtime.supervisor);
    supervisor.start();
    let watchdog_handle = tokio::spawn(runtime.watchdog.run(shutdown_rx.clone()));

    let server = ApiServer::new(Arc::new(runtime.control));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let server_rx = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(&addr, server_rx).await {
            tracing::error!("Server error: {}", e);
        }
    });

    shutdown_signal().await?;

    tracing::info!("Shutting down trading desk...");
    let _ = shutdown_tx.send(true);
    if let Err(e) = supervisor.shutdown().await {
        tracing::error!("Error during loop shutdown: {}", e);
    }
    let _ = tokio::join!(watchdog_handle, rollover_handle, server_handle);

    watcher_handle.abort();
    budget_sync.abort();
    persistence.abort();

    tracing::info!("Trading desk stopped");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to create SIGTERM handler")?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .context("failed to create SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
    }
    Ok(())
}

/// Creates the directory of a file-backed SQLite URL.
fn ensure_sqlite_parent(url: &str) -> Result<()> {
    let Some(file_path) = sqlite_file_path(url) else {
        return Ok(());
    };
    if let Some(parent) = file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

fn sqlite_file_path(url: &str) -> Option<&Path> {
    let rest = url.strip_prefix("sqlite://")?;
    let file = rest.split('?').next().unwrap_or(rest);
    if file.is_empty() || file.starts_with(":memory:") {
        return None;
    }
    Some(Path::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_file_path_strips_query() {
        assert_eq!(
            sqlite_file_path("sqlite://data/robopilot.db?mode=rwc"),
            Some(Path::new("data/robopilot.db"))
        );
        assert_eq!(sqlite_file_path("sqlite://:memory:"), None);
        assert_eq!(sqlite_file_path("postgres://localhost/db"), None);
    }

    #[test]
    fn test_ensure_sqlite_parent_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested/state.db");
        let url = format!("sqlite://{}?mode=rwc", db.display());

        ensure_sqlite_parent(&url).unwrap();
        assert!(dir.path().join("nested").is_dir());
    }
}
