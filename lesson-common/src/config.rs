//! Configuration file resolution and loading
//!
//! Config file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`<config dir>/<app>/config.toml`), if it exists
//! 4. Built-in defaults (no file)
//!
//! A file named explicitly (1 or 2) must exist and parse. The per-user file is
//! optional; its absence is not an error.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where a resolved configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Path given on the command line
    CommandLine(PathBuf),
    /// Path taken from an environment variable
    Environment(PathBuf),
    /// Per-user config file found on disk
    UserFile(PathBuf),
    /// No file; built-in defaults apply
    Defaults,
}

impl ConfigSource {
    /// File to read, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p) | ConfigSource::Environment(p) | ConfigSource::UserFile(p) => {
                Some(p.as_path())
            }
            ConfigSource::Defaults => None,
        }
    }

    /// True when the file was named explicitly and therefore must exist
    pub fn is_explicit(&self) -> bool {
        matches!(self, ConfigSource::CommandLine(_) | ConfigSource::Environment(_))
    }
}

/// Resolves which configuration file an application should read
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    app_name: String,
    env_var: String,
}

impl ConfigResolver {
    /// Create a resolver for an application
    ///
    /// `env_var` names the environment variable that may point at a config file.
    pub fn new(app_name: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            env_var: env_var.into(),
        }
    }

    /// Resolve the configuration source
    pub fn resolve(&self, cli_arg: Option<&Path>) -> ConfigSource {
        // Priority 1: Command-line argument
        if let Some(path) = cli_arg {
            return ConfigSource::CommandLine(path.to_path_buf());
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(&self.env_var) {
            if !path.trim().is_empty() {
                return ConfigSource::Environment(PathBuf::from(path));
            }
        }

        // Priority 3: Per-user config file
        if let Some(path) = self.user_config_path() {
            if path.exists() {
                return ConfigSource::UserFile(path);
            }
        }

        // Priority 4: Built-in defaults
        ConfigSource::Defaults
    }

    /// Default per-user config file location for the platform
    pub fn user_config_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(&self.app_name).join("config.toml"))
    }

    /// Resolve and load a TOML configuration, falling back to `T::default()`
    pub fn load<T>(&self, cli_arg: Option<&Path>) -> Result<(T, ConfigSource)>
    where
        T: DeserializeOwned + Default,
    {
        let source = self.resolve(cli_arg);
        let config = match source.path() {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                load_toml(path)?
            }
            None => {
                debug!("No configuration file found, using built-in defaults");
                T::default()
            }
        };
        Ok((config, source))
    }
}

/// Read and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    /// Build an `EnvFilter`-style directive for the given crate targets
    ///
    /// ```
    /// use lesson_common::config::LoggingConfig;
    ///
    /// let logging = LoggingConfig { level: "debug".to_string() };
    /// assert_eq!(logging.directive(&["lesson_player"]), "lesson_player=debug");
    /// ```
    pub fn directive(&self, targets: &[&str]) -> String {
        targets
            .iter()
            .map(|t| format!("{}={}", t, self.level))
            .collect::<Vec<_>>()
            .join(",")
    }
}
