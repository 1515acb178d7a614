//! CLI commands for the trading desk.

pub mod check_config;
pub mod run;

pub use check_config::{run_check_config, CheckConfigArgs};
pub use run::{run_desk, RunArgs};

use anyhow::Result;
use robopilot_core::{AppConfig, ConfigLoader};
use std::path::Path;

/// Loads `path`, layering `Config.{profile}.toml` over it when given.
pub(crate) fn load_config(path: &Path, profile: Option<&str>) -> Result<AppConfig> {
    match profile {
        Some(profile) => ConfigLoader::load_with_profile(path, profile),
        None => ConfigLoader::load_from(path),
    }
}
