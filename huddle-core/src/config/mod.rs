//! Configuration for Huddle
//!
//! Defaults, TOML files and `HUDDLE_<SECTION>_<KEY>` environment overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub notifications: NotificationConfig,
    pub limits: LimitsConfig,
}

/// SQLite store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; `:memory:` for a private in-memory database
    pub database_path: PathBuf,

    /// Maximum pooled connections
    pub pool_size: u32,

    /// How long a writer waits on a locked database
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

/// Notification delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Attach email fallbacks to mention and invite notifications
    pub email_fallback: bool,

    /// Events buffered per room
    pub broadcast_capacity: usize,

    pub email_subject_prefix: String,

    /// Base URL linked from notification emails
    pub app_url: String,
}

/// Input limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum workspace/channel name length, in characters
    pub max_name_len: usize,

    /// Maximum message length, in characters
    pub max_message_len: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./huddle.db"),
            pool_size: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            email_fallback: true,
            broadcast_capacity: 100,
            email_subject_prefix: "[Huddle]".to_string(),
            app_url: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_name_len: 100,
            max_message_len: 4000,
        }
    }
}

impl StoreConfig {
    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == ":memory:"
    }
}

fn parse_var<T>(key: &str, raw: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", key, e)))
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern `HUDDLE_<SECTION>_<KEY>`, e.g.
    /// `HUDDLE_STORE_DATABASE_PATH=/var/lib/huddle.db`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HUDDLE_*` overrides from an arbitrary lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).map(|v| (key.to_string(), v));

        if let Some((_, v)) = get("HUDDLE_STORE_DATABASE_PATH") {
            self.store.database_path = PathBuf::from(v);
        }
        if let Some((k, v)) = get("HUDDLE_STORE_POOL_SIZE") {
            self.store.pool_size = parse_var(&k, v)?;
        }
        if let Some((k, v)) = get("HUDDLE_STORE_BUSY_TIMEOUT") {
            self.store.busy_timeout = humantime::parse_duration(&v)
                .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", k, e)))?;
        }

        if let Some((_, v)) = get("HUDDLE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some((k, v)) = get("HUDDLE_LOG_JSON") {
            self.logging.json_format = parse_var(&k, v)?;
        }

        if let Some((k, v)) = get("HUDDLE_NOTIFICATIONS_EMAIL_FALLBACK") {
            self.notifications.email_fallback = parse_var(&k, v)?;
        }
        if let Some((k, v)) = get("HUDDLE_NOTIFICATIONS_BROADCAST_CAPACITY") {
            self.notifications.broadcast_capacity = parse_var(&k, v)?;
        }
        if let Some((_, v)) = get("HUDDLE_NOTIFICATIONS_EMAIL_SUBJECT_PREFIX") {
            self.notifications.email_subject_prefix = v;
        }
        if let Some((_, v)) = get("HUDDLE_NOTIFICATIONS_APP_URL") {
            self.notifications.app_url = v;
        }

        if let Some((k, v)) = get("HUDDLE_LIMITS_MAX_NAME_LEN") {
            self.limits.max_name_len = parse_var(&k, v)?;
        }
        if let Some((k, v)) = get("HUDDLE_LIMITS_MAX_MESSAGE_LEN") {
            self.limits.max_message_len = parse_var(&k, v)?;
        }

        Ok(())
    }

    /// Load configuration from a TOML file. Missing keys take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.pool_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "store.pool_size must be greater than 0".to_string(),
            ));
        }

        if self.notifications.broadcast_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "notifications.broadcast_capacity must be greater than 0".to_string(),
            ));
        }

        if self.limits.max_name_len == 0 || self.limits.max_message_len == 0 {
            return Err(ConfigError::ValidationFailed(
                "limits must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
