use std::collections::HashMap;
use thiserror::Error;

/// How chatty the session's tracing output is.
///
/// `Full` logs every operation, `Minimal` only data-changing operations,
/// `Errors` nothing below error level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Errors,
    Minimal,
    Full,
}

/// Connection parameters for one database. Immutable once a session has
/// been constructed from it.
#[derive(Debug, Clone)]
pub struct ConnectionProfile {
    /// Path of the SQLite database file, opened read-write-create.
    pub database: String,
    pub verbosity: Verbosity,
    pub max_connections: u32,
    pub busy_timeout_ms: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl ConnectionProfile {
    /// Profile with default settings for the given database file.
    pub fn new(database: impl Into<String>) -> Self {
        ConnectionProfile {
            database: database.into(),
            verbosity: Verbosity::Full,
            max_connections: 5,
            busy_timeout_ms: 5000,
        }
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database = env_map
            .get("GEOSESSION_DATABASE")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("GEOSESSION_DATABASE".to_string()))?;

        let verbosity = match env_map
            .get("GEOSESSION_VERBOSITY")
            .map(|s| s.as_str())
            .unwrap_or("full")
        {
            "full" => Verbosity::Full,
            "minimal" => Verbosity::Minimal,
            "errors" => Verbosity::Errors,
            other => {
                return Err(ConfigError::InvalidValue(
                    "GEOSESSION_VERBOSITY".to_string(),
                    format!("must be full, minimal, or errors, got {}", other),
                ))
            }
        };

        let max_connections = env_map
            .get("GEOSESSION_MAX_CONNECTIONS")
            .map(|s| s.as_str())
            .unwrap_or("5")
            .parse::<u32>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "GEOSESSION_MAX_CONNECTIONS".to_string(),
                    "must be a valid u32".to_string(),
                )
            })?;

        let busy_timeout_ms = env_map
            .get("GEOSESSION_BUSY_TIMEOUT_MS")
            .map(|s| s.as_str())
            .unwrap_or("5000")
            .parse::<u32>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "GEOSESSION_BUSY_TIMEOUT_MS".to_string(),
                    "must be a valid u32".to_string(),
                )
            })?;

        Ok(ConnectionProfile {
            database,
            verbosity,
            max_connections,
            busy_timeout_ms,
        })
    }
}
