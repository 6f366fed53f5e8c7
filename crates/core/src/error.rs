//! Core error types.
//!
//! All errors are explicit and typed; nothing in this crate panics.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for configuration handling.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },

    #[error("TOML serialize error: {reason}")]
    TomlSerializeFailed { reason: String },

    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
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

    /// Create an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let err = Error::invalid_config("demo.speed_factor", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid configuration: demo.speed_factor: must be at least 1"
        );
    }

    #[test]
    fn test_file_read_display_includes_path() {
        let err = Error::file_read_failed("/tmp/missing.toml", "not found");
        assert!(err.to_string().contains("/tmp/missing.toml"));
    }
}
