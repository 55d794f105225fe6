//! Structured logging setup.
//!
//! ```rust,ignore
//! use fabriq_server::logging::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default())?;
//! tracing::info!(tenant_id = "acme", "service started");
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::ServerError;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive such as `"info"` or `"fabriq_server=debug,info"`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Whether to include the module path.
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Human-readable debug output for local development.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }

    fn filter(&self) -> Result<EnvFilter, ServerError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level)
                .map_err(|e| ServerError::Logging(format!("invalid log level: {e}"))),
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ServerError> {
    let filter = config.filter()?;

    let layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(config.include_target)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(config.include_target)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| ServerError::Logging(e.to_string()))
}
