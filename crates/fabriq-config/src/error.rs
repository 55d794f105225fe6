//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("configuration file not found: {}", path.display())]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// Failed to read a configuration file.
    #[error("failed to read configuration file: {}", path.display())]
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

    /// The dotenv file could not be parsed.
    #[error("failed to load dotenv file {}: {reason}", path.display())]
    DotenvError {
        /// Path to the file.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// Unsupported file or string format.
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// Invalid configuration value.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// Environment variable parsing error.
    #[error("failed to parse environment variable {var}: {reason}")]
    EnvParseError {
        /// The variable name.
        var: String,
        /// Why parsing failed.
        reason: String,
    },
}

impl ConfigError {
    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates a read error.
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an environment variable parse error.
    pub fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            ConfigError::invalid_value("server.http_addr", "not an address").to_string(),
            "invalid configuration value for server.http_addr: not an address"
        );
        assert_eq!(
            ConfigError::env_parse_error("FABRIQ__AUTH__ENABLED", "expected boolean").to_string(),
            "failed to parse environment variable FABRIQ__AUTH__ENABLED: expected boolean"
        );
        assert!(ConfigError::file_not_found("/nope.toml")
            .to_string()
            .contains("/nope.toml"));
    }
}
