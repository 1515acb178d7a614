use crate::commands::{LoopCommand, TickReport};
use crate::trading_loop::{LoopDeps, TradingLoop};
use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

/// Cloneable handle to a running trading loop actor.
#[derive(Clone)]
pub struct LoopHandle {
    tx: mpsc::Sender<LoopCommand>,
    abort: AbortHandle,
}

impl LoopHandle {
    /// Spawns a new loop actor over `deps`.
    #[must_use]
    pub fn spawn(deps: LoopDeps) -> Self {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(TradingLoop::new(deps, rx).run());
        Self {
            tx,
            abort: task.abort_handle(),
        }
    }

    /// Runs a tick now instead of waiting for the interval.
    ///
    /// # Errors
    /// Returns an error if the actor has stopped.
    pub async fn tick(&self) -> Result<TickReport> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(LoopCommand::Tick(tx)).await?;
        let report = rx.await?;
        Ok(report)
    }

    /// Asks the actor to stop after its current tick.
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent to the actor.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(LoopCommand::Shutdown).await?;
        Ok(())
    }

    /// Kills the actor immediately. Submission tasks it spawned keep running.
    pub fn abort(&self) {
        self.abort.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}
