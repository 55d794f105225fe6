//! Configuration sections.
//!
//! Every section is `#[serde(default)]`, so a file only needs the keys it
//! changes. Unknown keys are rejected.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use fabriq_server::config::{
    DEFAULT_HTTP_ADDR, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
};
use fabriq_server::logging::{LogFormat, LoggingConfig};
use fabriq_server::{CorsConfig, JwtVerifier, ServerConfig};

use crate::ConfigError;

/// Complete service configuration.
///
/// # Example
///
/// ```
/// use fabriq_config::FabriqConfig;
///
/// let config = FabriqConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert_eq!(config.server.body_limit, "2M");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct FabriqConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Authentication settings.
    #[serde(default)]
    pub auth: AuthSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSection,

    /// Service identity.
    #[serde(default)]
    pub service: ServiceSection,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// Bind address.
    pub http_addr: String,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout.
    pub shutdown_timeout_secs: u64,
    /// Maximum request body, e.g. `"2M"` or `"512K"`.
    pub body_limit: String,
    /// Strip a trailing slash before routing.
    pub remove_trailing_slash: bool,
    /// CORS settings; CORS is off when absent.
    pub cors: Option<CorsSection>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            body_limit: "2M".to_string(),
            remove_trailing_slash: true,
            cors: None,
        }
    }
}

/// `[server.cors]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CorsSection {
    /// Allowed origins.
    pub allow_origins: Vec<String>,
    /// Allowed methods.
    pub allow_methods: Vec<String>,
    /// Allowed request headers.
    pub allow_headers: Vec<String>,
    /// Preflight cache lifetime in seconds.
    pub max_age: Option<u64>,
}

impl Default for CorsSection {
    fn default() -> Self {
        CorsConfig::default().into()
    }
}

impl From<CorsConfig> for CorsSection {
    fn from(cors: CorsConfig) -> Self {
        Self {
            allow_origins: cors.allow_origins,
            allow_methods: cors.allow_methods,
            allow_headers: cors.allow_headers,
            max_age: cors.max_age,
        }
    }
}

impl From<CorsSection> for CorsConfig {
    fn from(cors: CorsSection) -> Self {
        Self {
            allow_origins: cors.allow_origins,
            allow_methods: cors.allow_methods,
            allow_headers: cors.allow_headers,
            max_age: cors.max_age,
        }
    }
}

/// `[auth]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    /// Verify bearer tokens.
    pub enabled: bool,
    /// Let the token issuer select the tenant.
    pub multi_tenant: bool,
    /// HS256 signing secret. Required when `enabled`.
    pub jwt_secret: Option<String>,
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// Filter directive.
    pub level: String,
    /// `"json"` or `"pretty"`.
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// `[service]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceSection {
    /// Service name reported by `/health`.
    pub name: String,
    /// Service version reported by `/health`.
    pub version: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: "fabriq".to_string(),
            version: "0.0.0".to_string(),
        }
    }
}

impl FabriqConfig {
    /// Local development preset: pretty debug logs.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".to_string();
        config.logging.format = "pretty".to_string();
        config
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::invalid_value("service.name", "must not be empty"));
        }

        if self
            .server
            .http_addr
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        if parse_body_limit(&self.server.body_limit)? == 0 {
            return Err(ConfigError::invalid_value(
                "server.body_limit",
                "must be greater than zero",
            ));
        }

        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "server.request_timeout_secs",
                "must be greater than zero",
            ));
        }

        if self.auth.enabled
            && self
                .auth
                .jwt_secret
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(ConfigError::invalid_value(
                "auth.jwt_secret",
                "required when auth is enabled",
            ));
        }

        self.logging
            .format
            .parse::<LogFormat>()
            .map_err(|reason| ConfigError::invalid_value("logging.format", reason))?;

        Ok(())
    }

    /// Builds the HTTP server configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `server.body_limit` cannot be parsed.
    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let mut builder = ServerConfig::builder()
            .http_addr(&self.server.http_addr)
            .request_timeout(Duration::from_secs(self.server.request_timeout_secs))
            .shutdown_timeout(Duration::from_secs(self.server.shutdown_timeout_secs))
            .body_limit(parse_body_limit(&self.server.body_limit)?)
            .remove_trailing_slash(self.server.remove_trailing_slash)
            .multi_tenant(self.auth.multi_tenant)
            .service_name(&self.service.name)
            .service_version(&self.service.version);

        if let Some(cors) = &self.server.cors {
            builder = builder.cors(cors.clone().into());
        }

        Ok(builder.build())
    }

    /// Builds the logging configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `logging.format` is unknown.
    pub fn logging_config(&self) -> Result<LoggingConfig, ConfigError> {
        let format = self
            .logging
            .format
            .parse()
            .map_err(|reason| ConfigError::invalid_value("logging.format", reason))?;

        Ok(LoggingConfig {
            level: self.logging.level.clone(),
            format,
            ..LoggingConfig::default()
        })
    }

    /// Returns the token verifier when auth is enabled.
    #[must_use]
    pub fn jwt_verifier(&self) -> Option<JwtVerifier> {
        if !self.auth.enabled {
            return None;
        }
        self.auth
            .jwt_secret
            .as_deref()
            .map(|secret| JwtVerifier::hs256(secret.as_bytes()))
    }
}

/// Parses a size such as `"2M"`, `"512K"`, `"1G"` or a plain byte count.
///
/// Suffixes are binary multiples and case-insensitive; a trailing `B` is
/// accepted (`"2MB"`).
///
/// # Errors
///
/// Returns an error for anything else or on overflow.
///
/// # Example
///
/// ```
/// use fabriq_config::parse_body_limit;
///
/// assert_eq!(parse_body_limit("2M").unwrap(), 2 * 1024 * 1024);
/// assert_eq!(parse_body_limit("512k").unwrap(), 512 * 1024);
/// assert_eq!(parse_body_limit("100").unwrap(), 100);
/// ```
pub fn parse_body_limit(value: &str) -> Result<usize, ConfigError> {
    let invalid =
        || ConfigError::invalid_value("server.body_limit", format!("invalid size: {value:?}"));

    let upper = value.trim().to_ascii_uppercase();
    let trimmed = upper.strip_suffix('B').unwrap_or(&upper);

    let (digits, multiplier) = match trimmed.chars().last() {
        Some('K') => (&trimmed[..trimmed.len() - 1], 1024),
        Some('M') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('G') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        Some(c) if c.is_ascii_digit() => (trimmed, 1),
        _ => return Err(invalid()),
    };

    digits
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FabriqConfig::default();
        config.validate().unwrap();
        assert!(config.server.remove_trailing_slash);
        assert!(!config.auth.enabled);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_parse_body_limit() {
        assert_eq!(parse_body_limit("2M").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_body_limit("2mb").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_body_limit(" 1G ").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_body_limit("0").unwrap(), 0);
        assert!(parse_body_limit("").is_err());
        assert!(parse_body_limit("M").is_err());
        assert!(parse_body_limit("2T").is_err());
        assert!(parse_body_limit("-1K").is_err());
        assert!(parse_body_limit(&format!("{}G", usize::MAX)).is_err());
    }

    #[test]
    fn test_validation_errors_name_the_field() {
        let mut config = FabriqConfig::default();
        config.service.name = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "service.name"
        ));

        let mut config = FabriqConfig::default();
        config.server.http_addr = "localhost".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "server.http_addr"
        ));

        let mut config = FabriqConfig::default();
        config.server.body_limit = "0K".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "server.body_limit"
        ));

        let mut config = FabriqConfig::default();
        config.auth.enabled = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "auth.jwt_secret"
        ));

        let mut config = FabriqConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_config_conversion() {
        let mut config = FabriqConfig::default();
        config.server.http_addr = "127.0.0.1:9000".to_string();
        config.server.body_limit = "64K".to_string();
        config.server.request_timeout_secs = 5;
        config.server.cors = Some(CorsSection::default());
        config.auth.multi_tenant = true;
        config.service.name = "orders".to_string();

        let server = config.server_config().unwrap();
        assert_eq!(server.http_addr(), "127.0.0.1:9000");
        assert_eq!(server.body_limit(), 64 * 1024);
        assert_eq!(server.request_timeout(), Duration::from_secs(5));
        assert!(server.multi_tenant());
        assert_eq!(server.service_name(), "orders");
        assert_eq!(server.cors(), Some(&CorsConfig::default()));
    }

    #[test]
    fn test_logging_config_conversion() {
        let logging = FabriqConfig::development().logging_config().unwrap();
        assert_eq!(logging.level, "debug");
        assert_eq!(logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_jwt_verifier_only_when_enabled() {
        let mut config = FabriqConfig::default();
        config.auth.jwt_secret = Some("s3cret".to_string());
        assert!(config.jwt_verifier().is_none());

        config.auth.enabled = true;
        assert!(config.jwt_verifier().is_some());
    }
}
