use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub presence: PresenceConfig,
    pub room: RoomPolicy,
    pub logging: LoggingConfig,
}

/// Playback synchronization policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between periodic computed-position snapshots.
    pub snapshot_interval_seconds: u64,
    /// Reported client positions deviating further than this are logged
    /// at WARN.
    pub drift_log_threshold_seconds: f64,
    /// Default for rooms that do not override control policy at creation.
    pub host_only_control: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_seconds: 5,
            drift_log_threshold_seconds: 2.0,
            host_only_control: true,
        }
    }
}

/// Heartbeat liveness policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// A participant without a heartbeat for this long is presumed
    /// disconnected and evicted by the sweep.
    pub heartbeat_timeout_seconds: u64,
    /// Interval between presence sweeps, independent of intent traffic.
    pub sweep_interval_seconds: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: 30,
            sweep_interval_seconds: 10,
        }
    }
}

/// Room lifecycle and chat policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomPolicy {
    /// How long an empty room lingers before closing, to tolerate brief
    /// reconnects.
    pub empty_room_grace_seconds: u64,
    /// Number of recent chat messages replayed to a late joiner.
    pub chat_backlog_limit: usize,
    /// Maximum accepted chat message length in characters.
    pub chat_max_length: usize,
}

impl Default for RoomPolicy {
    fn default() -> Self {
        Self {
            empty_room_grace_seconds: 60,
            chat_backlog_limit: 50,
            chat_max_length: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        // Load config file if provided
        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (LOCKSTEP_SYNC_HOST_ONLY_CONTROL, etc.)
        builder = builder.add_source(
            Environment::with_prefix("LOCKSTEP")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Reject values the engine cannot run with (zero timer intervals,
    /// zero chat bounds).
    pub fn validate(&self) -> Result<()> {
        if self.sync.snapshot_interval_seconds == 0 {
            return Err(Error::InvalidConfig(
                "sync.snapshot_interval_seconds must be positive".to_string(),
            ));
        }
        if !self.sync.drift_log_threshold_seconds.is_finite()
            || self.sync.drift_log_threshold_seconds < 0.0
        {
            return Err(Error::InvalidConfig(
                "sync.drift_log_threshold_seconds must be a non-negative number".to_string(),
            ));
        }
        if self.presence.heartbeat_timeout_seconds == 0 {
            return Err(Error::InvalidConfig(
                "presence.heartbeat_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.presence.sweep_interval_seconds == 0 {
            return Err(Error::InvalidConfig(
                "presence.sweep_interval_seconds must be positive".to_string(),
            ));
        }
        if self.room.chat_max_length == 0 {
            return Err(Error::InvalidConfig(
                "room.chat_max_length must be positive".to_string(),
            ));
        }
        if self.room.chat_backlog_limit == 0 {
            return Err(Error::InvalidConfig(
                "room.chat_backlog_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sync.snapshot_interval_seconds, 5);
        assert!((config.sync.drift_log_threshold_seconds - 2.0).abs() < f64::EPSILON);
        assert!(config.sync.host_only_control);
        assert_eq!(config.presence.heartbeat_timeout_seconds, 30);
        assert_eq!(config.presence.sweep_interval_seconds, 10);
        assert_eq!(config.room.empty_room_grace_seconds, 60);
        assert_eq!(config.room.chat_backlog_limit, 50);
        assert_eq!(config.room.chat_max_length, 500);
        assert_eq!(config.logging.level, "info");
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut config = Config::default();
        config.presence.sweep_interval_seconds = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::default();
        config.sync.snapshot_interval_seconds = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::default();
        config.room.chat_max_length = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load(Some("/nonexistent/lockstep.toml")).expect("load");
        assert_eq!(config.room.chat_backlog_limit, 50);
    }
}
