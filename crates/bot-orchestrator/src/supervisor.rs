use crate::commands::HaltReason;
use crate::loop_handle::LoopHandle;
use crate::trading_loop::LoopDeps;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

/// What the watchdog can do to the thing it watches.
#[async_trait]
pub trait Supervised: Send + Sync {
    /// Replaces the running instance with a fresh one.
    async fn restart(&self) -> Result<()>;

    /// Returns `true` if this call halted it.
    fn halt(&self, reason: HaltReason) -> bool;

    fn is_halted(&self) -> bool;
}

/// Owns the current trading loop actor.
pub struct LoopSupervisor {
    deps: LoopDeps,
    handle: Mutex<Option<LoopHandle>>,
}

impl LoopSupervisor {
    #[must_use]
    pub const fn new(deps: LoopDeps) -> Self {
        Self {
            deps,
            handle: Mutex::new(None),
        }
    }

    /// Spawns the loop if it is not already running.
    pub fn start(&self) -> LoopHandle {
        let mut slot = self.handle.lock();
        match slot.as_ref() {
            Some(handle) if !handle.is_finished() => handle.clone(),
            _ => {
                let handle = LoopHandle::spawn(self.deps.clone());
                *slot = Some(handle.clone());
                handle
            }
        }
    }

    #[must_use]
    pub fn handle(&self) -> Option<LoopHandle> {
        self.handle.lock().clone()
    }

    /// # Errors
    ///
    /// Returns an error if the actor is already gone.
    pub async fn shutdown(&self) -> Result<()> {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Supervised for LoopSupervisor {
    async fn restart(&self) -> Result<()> {
        let old = self.handle.lock().take();
        if let Some(old) = old {
            // a hung actor would never read a shutdown command
            old.abort();
        }
        self.start();
        info!("Trading loop restarted");
        Ok(())
    }

    fn halt(&self, reason: HaltReason) -> bool {
        let halted = self.deps.control.halt(reason);
        if halted {
            self.deps.desk.emit_halt(&reason.to_string());
        } else {
            warn!(reason = %reason, "Halt requested on an already halted loop");
        }
        halted
    }

    fn is_halted(&self) -> bool {
        self.deps.control.is_halted()
    }
}
