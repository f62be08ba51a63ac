//! Configuration management for lesson-player
//!
//! Single-tier TOML configuration. Every field carries a built-in default, so
//! an absent file (or an empty one) yields a fully usable configuration.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`LESSON_PLAYER_CONFIG`)
//! 3. Per-user config file (`<config dir>/lesson-player/config.toml`)
//! 4. Built-in defaults (code constants)

use crate::error::Result;
use lesson_common::config::{ConfigResolver, ConfigSource, LoggingConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application name used for the per-user config directory
pub const APP_NAME: &str = "lesson-player";

/// Environment variable that may name a config file
pub const CONFIG_ENV_VAR: &str = "LESSON_PLAYER_CONFIG";

/// What the sequencer does with a segment that has no playable audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingAudioPolicy {
    /// Show the segment for its duration hint (or the fallback), then advance
    #[default]
    Dwell,
    /// Stall on the segment until the user asks for the next one
    Hold,
}

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub preload: PreloadConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sequencing behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    /// Delay between lesson load and auto-start of segment 0
    ///
    /// Default: 150ms
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,

    #[serde(default)]
    pub missing_audio: MissingAudioPolicy,

    /// Dwell time for audio-less segments without a duration hint
    ///
    /// Default: 5000ms
    #[serde(default = "default_dwell_fallback_ms")]
    pub dwell_fallback_ms: u64,

    /// Speed factor of the headless clock device
    #[serde(default = "default_clock_speed")]
    pub clock_speed: f64,
}

/// Image preloading
#[derive(Debug, Clone, Deserialize)]
pub struct PreloadConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Event broadcasting
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Broadcast channel capacity
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_startup_grace_ms() -> u64 {
    150
}

fn default_dwell_fallback_ms() -> u64 {
    5000
}

fn default_clock_speed() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION"))
}

fn default_bus_capacity() -> usize {
    100
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            startup_grace_ms: default_startup_grace_ms(),
            missing_audio: MissingAudioPolicy::default(),
            dwell_fallback_ms: default_dwell_fallback_ms(),
            clock_speed: default_clock_speed(),
        }
    }
}

impl PlaybackConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn dwell_fallback(&self) -> Duration {
        Duration::from_millis(self.dwell_fallback_ms)
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user_agent: default_user_agent(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            bus_capacity: default_bus_capacity(),
        }
    }
}

impl PlayerConfig {
    /// Resolve and load the configuration file
    pub fn resolve(cli_path: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let resolver = ConfigResolver::new(APP_NAME, CONFIG_ENV_VAR);
        let (config, source) = resolver.load::<PlayerConfig>(cli_path)?;
        Ok((config, source))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| crate::error::Error::Config(format!("Invalid configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.playback.startup_grace_ms, 150);
        assert_eq!(config.playback.missing_audio, MissingAudioPolicy::Dwell);
        assert_eq!(config.playback.dwell_fallback(), Duration::from_secs(5));
        assert_eq!(config.playback.clock_speed, 1.0);
        assert!(config.preload.enabled);
        assert!(config.preload.user_agent.starts_with("lesson-player/"));
        assert_eq!(config.events.bus_capacity, 100);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = PlayerConfig::from_toml("").unwrap();
        assert_eq!(config.playback.startup_grace_ms, 150);
        assert_eq!(config.events.bus_capacity, 100);
    }

    #[test]
    fn test_partial_sections() {
        let config = PlayerConfig::from_toml(
            r#"
            [playback]
            missing_audio = "hold"
            clock_speed = 4.0

            [preload]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.playback.missing_audio, MissingAudioPolicy::Hold);
        assert_eq!(config.playback.clock_speed, 4.0);
        // Unspecified fields keep their defaults
        assert_eq!(config.playback.startup_grace_ms, 150);
        assert!(!config.preload.enabled);
        assert!(config.preload.user_agent.starts_with("lesson-player/"));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let result = PlayerConfig::from_toml("[playback]\nmissing_audio = \"skip\"\n");
        assert!(result.is_err());
    }
}
