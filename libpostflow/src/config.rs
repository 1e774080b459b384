//! Configuration management for Postflow
//!
//! Settings come from a TOML file. Every section is optional; a missing file
//! yields [`Config::default_config`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

pub const CONFIG_ENV: &str = "POSTFLOW_CONFIG";
pub const DB_PATH_ENV: &str = "POSTFLOW_DB_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerSettings,
    pub activity: ActivityConfig,
    pub publisher: Option<PublisherConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/postflow/posts.db".to_string(),
        }
    }
}

/// Scheduler timings, all in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub poll_interval: u64,
    pub publish_pause: u64,
    pub stop_timeout: u64,
    pub publish_timeout: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: 60,
            publish_pause: 2,
            stop_timeout: 5,
            publish_timeout: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub retention_days: u32,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self { retention_days: 90 }
    }
}

/// External program used to publish posts.
///
/// It receives `args` followed by the media path, and the caption on stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds before the program is killed; falls back to
    /// `scheduler.publish_timeout`.
    pub timeout: Option<u64>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path, falling back to defaults if
    /// the file does not exist.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
            toml::from_str(&content).map_err(ConfigError::ParseError)?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Self::default_config()
        };

        if let Ok(db_path) = std::env::var(DB_PATH_ENV) {
            config.database.path = db_path;
        }

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.scheduler.poll_interval == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.poll_interval".to_string(),
                reason: "must be at least 1 second".to_string(),
            }
            .into());
        }
        if self.scheduler.publish_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.publish_timeout".to_string(),
                reason: "must be at least 1 second".to_string(),
            }
            .into());
        }
        if let Some(publisher) = &self.publisher {
            if publisher.command.trim().is_empty() {
                return Err(ConfigError::MissingField("publisher.command".to_string()).into());
            }
            if publisher.timeout == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "publisher.timeout".to_string(),
                    reason: "must be at least 1 second".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Database path with `~` expanded
    pub fn db_path(&self) -> String {
        shellexpand::tilde(&self.database.path).to_string()
    }

    pub fn publish_timeout(&self) -> Duration {
        let secs = self
            .publisher
            .as_ref()
            .and_then(|p| p.timeout)
            .unwrap_or(self.scheduler.publish_timeout);
        Duration::from_secs(secs)
    }
}

/// Resolve the configuration file path following XDG Base Directory conventions
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("postflow").join("config.toml"))
}
