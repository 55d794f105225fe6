//! Server error types.

use thiserror::Error;

/// Errors starting or running the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured address is invalid or already in use.
    #[error("bind error: {0}")]
    Bind(String),

    /// I/O failure while serving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Logging could not be initialized.
    #[error("logging init error: {0}")]
    Logging(String),
}
