//! Configuration errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating gateway configuration.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config {path}: {message}")]
    Read {
        /// Path that failed to open
        path: String,
        /// Underlying I/O error message
        message: String,
    },

    /// Config file could not be parsed as YAML
    #[error("Failed to parse config {path}: {message}")]
    Parse {
        /// Path that failed to parse
        path: String,
        /// Parser error message
        message: String,
    },

    /// A config value failed validation
    #[error("Invalid config: {message}")]
    Invalid {
        /// What validation failed
        message: String,
    },

    /// Encrypted value present but master key missing or malformed
    #[error("Master key error: {message}")]
    MasterKey {
        /// Description of the master key problem
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_contains_path() {
        let err = ConfigError::Parse {
            path: "config.yaml".to_string(),
            message: "bad indent".to_string(),
        };
        assert!(format!("{}", err).contains("config.yaml"));
    }
}
