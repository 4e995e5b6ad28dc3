//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// Failed to read configuration file.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML configuration: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON parsing error.
    #[error("failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// Offending field, dotted path.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// Missing required field.
    #[error("missing required configuration field: {field}")]
    MissingField {
        /// Missing field, dotted path.
        field: String,
    },

    /// Environment variable parsing error.
    #[error("failed to parse environment variable {var}: {reason}")]
    EnvParseError {
        /// Variable name.
        var: String,
        /// Why parsing failed.
        reason: String,
    },

    /// Validation error after loading.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),

    /// A component rejected the configuration it was built from.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Component error.
        message: String,
    },
}

impl ConfigError {
    /// Create a file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Create a read error.
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create an environment variable parse error.
    pub fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// Create a validation error.
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }
}

impl From<arbiter_pdp::PdpError> for ConfigError {
    fn from(err: arbiter_pdp::PdpError) -> Self {
        Self::InvalidConfig {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_not_found_error() {
        let err = ConfigError::file_not_found("/etc/arbiter/pdp.toml");
        assert!(err.to_string().contains("/etc/arbiter/pdp.toml"));
    }

    #[test]
    fn test_invalid_value_error() {
        let err = ConfigError::invalid_value("admission.max_requests", "must be at least 1");
        assert!(err.to_string().contains("admission.max_requests"));
        assert!(err.to_string().contains("must be at least 1"));
    }

    #[test]
    fn test_env_parse_error() {
        let err = ConfigError::env_parse_error("ARBITER__POLICY__RETENTION_INTERVAL_MINS", "expected integer");
        assert!(err.to_string().contains("RETENTION_INTERVAL_MINS"));
        assert!(err.to_string().contains("expected integer"));
    }

    #[test]
    fn test_pdp_error_conversion() {
        let err: ConfigError = arbiter_pdp::PdpError::config("no endpoints").into();
        assert!(matches!(err, ConfigError::InvalidConfig { .. }));
        assert!(err.to_string().contains("no endpoints"));
    }
}
