//! Application configuration consumed by the database initializer.
//!
//! # Responsibility
//! - Load JSON configuration with defaults for every field.
//! - Expand `${VAR}` / `${VAR:-default}` references in the storage address.
//! - Reject values that cannot produce a working startup sequence.

use once_cell::sync::OnceCell;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_DRIVER: &str = "sqlite";
pub const DEFAULT_ADDRESS: &str = "data/appbase.sqlite3";
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Configuration loading and validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config file: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Storage backend selection and connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Registered driver identifier (default: `sqlite`).
    pub driver: String,

    /// File path for SQLite (`:memory:` allowed), DSN for Postgres.
    pub address: String,

    /// Upper bound for connect, table creation, and migration together.
    pub startup_timeout_ms: u64,

    /// SQLite lock wait applied to the connection.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DEFAULT_DRIVER.to_string(),
            address: DEFAULT_ADDRESS.to_string(),
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl DatabaseConfig {
    /// Shorthand for a config selecting `driver` at `address`.
    pub fn new(driver: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Checks every field for a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.driver.trim().is_empty() {
            return Err(ConfigError::Invalid("database.driver cannot be empty".to_string()));
        }
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("database.address cannot be empty".to_string()));
        }
        if self.startup_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "database.startup_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "database.busy_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
}

impl AppConfig {
    /// Loads and validates configuration from a JSON file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Parses and validates configuration from JSON text.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(content)?;
        config.database.address = expand_env_vars(&config.database.address);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()
    }
}

/// Expands `${VAR}` and `${VAR:-default}` using the process environment.
///
/// Unset variables without a default expand to an empty string.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: OnceCell<Option<Regex>> = OnceCell::new();

    let Some(regex) = ENV_VAR_REGEX
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").ok())
    else {
        return input.to_string();
    };

    regex
        .replace_all(input, |caps: &Captures| {
            let default_value = caps.get(2).map_or("", |m| m.as_str());
            std::env::var(&caps[1]).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}
