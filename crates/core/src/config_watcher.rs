use crate::config::AppConfig;
use crate::config_loader::ConfigLoader;
use anyhow::Result;
use notify::{Event, RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::watch;

/// Publishes a freshly validated [`AppConfig`] whenever the config file changes.
pub struct ConfigWatcher {
    tx: watch::Sender<AppConfig>,
    path: PathBuf,
    profile: Option<String>,
}

impl ConfigWatcher {
    /// Creates a watcher for `path` seeded with the configuration already loaded from it.
    ///
    /// Returns a tuple of the watcher and a receiver for configuration updates.
    #[must_use]
    pub fn new(initial_config: AppConfig, path: impl Into<PathBuf>) -> (Self, watch::Receiver<AppConfig>) {
        let (tx, rx) = watch::channel(initial_config);
        (
            Self {
                tx,
                path: path.into(),
                profile: None,
            },
            rx,
        )
    }

    /// Reloads through the `Config.{profile}.toml` overlay as well.
    #[must_use]
    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    /// Watches the configuration file and broadcasts changed configurations.
    ///
    /// Invalid edits are logged and ignored; subscribers keep the last good config.
    ///
    /// # Errors
    ///
    /// Returns an error if file watching cannot be initiated or if the watcher task fails.
    pub async fn watch(&self) -> Result<()> {
        let tx = self.tx.clone();
        let path = self.path.clone();
        let profile = self.profile.clone();

        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = notify::recommended_watcher(move |res: Result<Event, _>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            })?;

            watcher.watch(&path, RecursiveMode::NonRecursive)?;

            for event in notify_rx {
                if !event.kind.is_modify() {
                    continue;
                }
                tracing::info!(path = %path.display(), "Config file changed, reloading...");
                let reloaded = match &profile {
                    Some(profile) => ConfigLoader::load_with_profile(&path, profile),
                    None => ConfigLoader::load_from(&path),
                };
                match reloaded {
                    Ok(new_config) => {
                        let changed = tx.send_if_modified(|current| {
                            if *current == new_config {
                                false
                            } else {
                                *current = new_config;
                                true
                            }
                        });
                        if changed {
                            tracing::info!("Config reloaded successfully");
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to reload config, keeping previous: {:#}", e);
                    }
                }
            }

            Ok::<_, anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}
