use crate::config::RefereeConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

/// Default location of the referee configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/Referee.toml";

/// Prefix of environment variables that override file settings.
/// Nested keys use `__`, e.g. `REFEREE_SCHEDULE__INGEST_INTERVAL_SECS=2`.
pub const ENV_PREFIX: &str = "REFEREE_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by layering built-in defaults, the TOML file at
    /// `path` (if present), and `REFEREE_`-prefixed environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed, a value has the wrong
    /// type, or the merged configuration fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<RefereeConfig> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using defaults and environment"
            );
        }

        let figment = Self::defaults()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config = Self::extract(figment)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;

        tracing::info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Base figment holding the built-in defaults.
    #[must_use]
    pub fn defaults() -> Figment {
        Figment::from(Serialized::defaults(RefereeConfig::default()))
    }

    /// Extracts and validates a configuration from an arbitrary figment.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction or validation fails.
    pub fn extract(figment: Figment) -> Result<RefereeConfig> {
        let config: RefereeConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}
