//! Configuration error types.

use std::fmt;

/// Error raised while loading configuration or registering routes.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to parse environment variable.
    Parse {
        key: String,
        value: String,
        error: String,
    },
    /// Invalid value for environment variable.
    Invalid { key: String, message: String },
    /// A (method, path) pair was registered twice.
    DuplicateRoute { method: String, path: String },
    /// A route pattern could not be parsed.
    InvalidRoute { path: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse { key, value, error } => {
                write!(f, "failed to parse {}='{}': {}", key, value, error)
            }
            ConfigError::Invalid { key, message } => {
                write!(f, "invalid value for {}: {}", key, message)
            }
            ConfigError::DuplicateRoute { method, path } => {
                write!(f, "duplicate route: {} {}", method, path)
            }
            ConfigError::InvalidRoute { path, message } => {
                write!(f, "invalid route '{}': {}", path, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
