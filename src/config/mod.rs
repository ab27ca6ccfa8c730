//! # Configuration Management Module
//!
//! TOML configuration for the trainer, loaded asynchronously with `tokio::fs`.
//!
//! ## Configuration Structure
//!
//! - [`TrainerConfig`] - Display name, leaderboard size and seeding
//! - [`StorageConfig`] - Where the sled database lives
//! - [`LoggingConfig`] - Log level and optional log file
//! - [`NotificationConfig`] - Messaging sink queue
//!
//! ## Usage
//!
//! ```rust,no_run
//! use opstrainer::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("config.toml").await?;
//!     let config = Config::load("config.toml").await?;
//!     println!("Database: {}", config.storage.db_path().display());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [trainer]
//! name = "Operator Trainer"
//! top_users_limit = 10
//! seed_defaults = true
//! scenarios_seed_file = "data/seeds/scenarios.json"
//!
//! [storage]
//! data_dir = "./data"
//!
//! [logging]
//! level = "info"
//! file = "opstrainer.log"
//!
//! [notifications]
//! enabled = true
//! queue_capacity = 256
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub name: String,
    /// Size of the top-users table in statistics.
    #[serde(default = "default_top_users_limit")]
    pub top_users_limit: usize,
    /// Install default levels, categories and sample scenarios into an empty store.
    #[serde(default = "default_true")]
    pub seed_defaults: bool,
    /// Extra scenarios applied by `opstrainer seed` when no path is given.
    #[serde(default)]
    pub scenarios_seed_file: Option<String>,
}

fn default_top_users_limit() -> usize {
    crate::trainer::stats::DEFAULT_TOP_USERS
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Overrides `<data_dir>/trainer`.
    #[serde(default)]
    pub db_path: Option<String>,
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.data_dir).join("trainer"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of off, error, warn, info, debug, trace. `-v` on the command line wins.
    pub level: String,
    pub file: Option<String>,
}

impl LoggingConfig {
    pub fn level_filter(&self) -> Result<log::LevelFilter> {
        self.level
            .trim()
            .parse::<log::LevelFilter>()
            .map_err(|_| anyhow!("logging.level '{}' is not a log level", self.level))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub trainer: TrainerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.trainer.top_users_limit == 0 {
            return Err(anyhow!("trainer.top_users_limit must be at least 1"));
        }
        if self.notifications.queue_capacity == 0 {
            return Err(anyhow!("notifications.queue_capacity must be at least 1"));
        }
        if self.storage.data_dir.trim().is_empty() {
            return Err(anyhow!("storage.data_dir cannot be empty"));
        }
        if self.trainer.name.trim().is_empty() {
            return Err(anyhow!("trainer.name cannot be empty"));
        }
        self.logging.level_filter()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            trainer: TrainerConfig {
                name: "Operator Trainer".to_string(),
                top_users_limit: default_top_users_limit(),
                seed_defaults: true,
                scenarios_seed_file: None,
            },
            storage: StorageConfig {
                data_dir: "./data".to_string(),
                db_path: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("opstrainer.log".to_string()),
            },
            notifications: NotificationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trainer.top_users_limit, 10);
        assert_eq!(config.storage.db_path(), PathBuf::from("./data").join("trainer"));
    }

    #[test]
    fn test_minimal_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [trainer]
            name = "Desk"

            [storage]
            data_dir = "/var/lib/trainer"
            db_path = "/srv/trainer-db"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.trainer.top_users_limit, 10);
        assert!(config.trainer.seed_defaults);
        assert!(config.notifications.enabled);
        assert_eq!(config.notifications.queue_capacity, 256);
        assert_eq!(config.storage.db_path(), PathBuf::from("/srv/trainer-db"));
        assert_eq!(config.logging.file, None);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.trainer.top_users_limit = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.notifications.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.data_dir = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_logging_level_is_parsed() {
        let mut config = Config::default();
        assert_eq!(config.logging.level_filter().unwrap(), log::LevelFilter::Info);

        config.logging.level = "WARN".to_string();
        assert_eq!(config.logging.level_filter().unwrap(), log::LevelFilter::Warn);

        config.logging.level = "chatty".to_string();
        assert!(config.logging.level_filter().is_err());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.trainer.name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.trainer.name, "Operator Trainer");
        assert_eq!(parsed.logging.file.as_deref(), Some("opstrainer.log"));
    }
}
