//! Application configuration loaded from TOML.
//!
//! # Responsibility
//! - Define every tunable of the notifier with a working default.
//! - Load and validate configuration files.
//!
//! # Invariants
//! - A missing config file yields `AppConfig::default()`.
//! - Validated configs have a positive chunk size and attempt count.
//! - Secrets never live here; see `credential`.

use crate::service::bulk_loader::DEFAULT_CHUNK_SIZE;
use crate::service::retry::{RetryPolicy, DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "BIRTHDAY_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Text formatting mode for outbound messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    #[default]
    Markdown,
    Plain,
}

impl ParseMode {
    /// Value for Telegram's `parse_mode` field, if any.
    pub fn telegram_name(self) -> Option<&'static str> {
        match self {
            Self::Markdown => Some("Markdown"),
            Self::Plain => None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite file for the record store. When unset the `database-path`
    /// secret is used.
    pub database_path: Option<PathBuf>,
    /// Log level: trace|debug|info|warn|error.
    pub log_level: String,
    /// Absolute directory for rolling log files. `None` disables file logs.
    pub log_dir: Option<PathBuf>,
    pub loader: LoaderConfig,
    pub telegram: TelegramConfig,
}

/// Bulk loader tunables. Loads through the SQLite store run on one
/// connection, so there is no worker setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub chunk_size: usize,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

/// Telegram transport settings. Token and chat id come from secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_base: String,
    pub parse_mode: ParseMode,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: crate::logging::default_log_level().to_string(),
            log_dir: None,
            loader: LoaderConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF.as_millis() as u64,
        }
    }
}

impl LoaderConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            parse_mode: ParseMode::Markdown,
            connect_timeout_secs: 10,
            read_timeout_secs: 20,
        }
    }
}

impl AppConfig {
    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text, path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Loads from an explicit path, then `BIRTHDAY_CONFIG`, else defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loader.chunk_size == 0 {
            return Err(ConfigError::Invalid("loader.chunk_size must be positive".to_string()));
        }
        if self.loader.max_attempts == 0 {
            return Err(ConfigError::Invalid("loader.max_attempts must be positive".to_string()));
        }
        if let Some(dir) = &self.log_dir {
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "log_dir must be an absolute path, got `{}`",
                    dir.display()
                )));
            }
        }
        if self.telegram.api_base.trim().is_empty() {
            return Err(ConfigError::Invalid("telegram.api_base cannot be empty".to_string()));
        }
        Ok(())
    }
}
