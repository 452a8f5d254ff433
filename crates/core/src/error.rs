//! Core error types for the composition controller.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for configuration and shared record handling.
#[derive(Debug, Error)]
pub enum Error {
    // I/O errors
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    // Parsing errors
    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },

    #[error("invalid value for {key}: {reason}")]
    InvalidEnvValue { key: String, reason: String },

    // Validation errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Generic I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a TOML parse error.
    pub fn toml_parse_failed(reason: impl Into<String>) -> Self {
        Self::TomlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid environment value error.
    pub fn invalid_env_value(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEnvValue {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_env_value("HELM_MAX_HISTORY", "not a number");
        assert!(err.to_string().contains("HELM_MAX_HISTORY"));
        assert!(err.to_string().contains("not a number"));
    }

    #[test]
    fn test_file_read_failed_names_path() {
        let err = Error::file_read_failed("/etc/controller.toml", "permission denied");
        assert!(err.to_string().contains("/etc/controller.toml"));
    }
}
