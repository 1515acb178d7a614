use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `config/Config.toml` and `PILOT_` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read, parsed, or validated.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from a specific file, then applies environment overrides.
    ///
    /// Nested keys use a double underscore: `PILOT_RISK__DAILY_LIMIT=0.04`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read, parsed, or validated.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        let config: AppConfig = Self::base(path)
            .extract()
            .with_context(|| format!("failed to load config from {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration with a profile overlay such as `Config.cloud.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read, parsed, or validated.
    pub fn load_with_profile(path: impl AsRef<Path>, profile: &str) -> Result<AppConfig> {
        let path = path.as_ref();
        let overlay = path.with_file_name(format!("Config.{profile}.toml"));

        let config: AppConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Toml::file(&overlay))
            .merge(Env::prefixed("PILOT_").split("__"))
            .extract()
            .with_context(|| format!("failed to load profile '{profile}'"))?;

        config.validate()?;
        Ok(config)
    }

    fn base(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("PILOT_").split("__"))
    }
}
