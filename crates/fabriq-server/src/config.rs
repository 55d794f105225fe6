//! Server configuration types.
//!
//! # Example
//!
//! ```rust
//! use fabriq_server::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .http_addr("0.0.0.0:8080")
//!     .request_timeout(Duration::from_secs(10))
//!     .multi_tenant(true)
//!     .build();
//!
//! assert_eq!(config.http_addr(), "0.0.0.0:8080");
//! assert!(config.multi_tenant());
//! ```

use std::net::SocketAddr;
use std::time::Duration;

/// Default HTTP bind address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default maximum request body size (2 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Cross-origin resource sharing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsConfig {
    /// Allowed origins; `"*"` allows any.
    pub allow_origins: Vec<String>,
    /// Methods announced in preflight responses.
    pub allow_methods: Vec<String>,
    /// Headers announced in preflight responses.
    pub allow_headers: Vec<String>,
    /// Preflight cache lifetime in seconds.
    pub max_age: Option<u64>,
}

impl CorsConfig {
    /// Returns the value for `Access-Control-Allow-Origin`, if `origin` is allowed.
    #[must_use]
    pub fn allowed_origin(&self, origin: &str) -> Option<String> {
        if self.allow_origins.iter().any(|o| o == "*") {
            return Some("*".to_string());
        }
        self.allow_origins
            .iter()
            .find(|o| o.eq_ignore_ascii_case(origin))
            .map(|_| origin.to_string())
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_string()],
            allow_methods: ["GET", "HEAD", "PUT", "PATCH", "POST", "DELETE"]
                .into_iter()
                .map(String::from)
                .collect(),
            allow_headers: ["Authorization", "Content-Type", "X-TenantId", "X-Request-Id"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_age: None,
        }
    }
}

/// Server configuration.
///
/// Use [`ServerConfig::builder()`] to construct instances.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    http_addr: String,
    shutdown_timeout: Duration,
    request_timeout: Duration,
    body_limit: usize,
    cors: Option<CorsConfig>,
    remove_trailing_slash: bool,
    multi_tenant: bool,
    service_name: String,
    service_version: String,
}

impl ServerConfig {
    /// Creates a new server configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Returns the HTTP bind address.
    #[must_use]
    pub fn http_addr(&self) -> &str {
        &self.http_addr
    }

    /// Parses the HTTP address as a `SocketAddr`.
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.http_addr.parse()
    }

    /// Returns how long shutdown waits for in-flight connections.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the maximum accepted body size in bytes.
    #[must_use]
    pub fn body_limit(&self) -> usize {
        self.body_limit
    }

    /// Returns the CORS settings, if CORS is enabled.
    #[must_use]
    pub fn cors(&self) -> Option<&CorsConfig> {
        self.cors.as_ref()
    }

    /// Returns whether `/path/` is routed like `/path`.
    #[must_use]
    pub fn remove_trailing_slash(&self) -> bool {
        self.remove_trailing_slash
    }

    /// Returns whether the token issuer selects the tenant.
    #[must_use]
    pub fn multi_tenant(&self) -> bool {
        self.multi_tenant
    }

    /// Returns the service name reported by `/health`.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Returns the service version reported by `/health`.
    #[must_use]
    pub fn service_version(&self) -> &str {
        &self.service_version
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    http_addr: String,
    shutdown_timeout: Duration,
    request_timeout: Duration,
    body_limit: usize,
    cors: Option<CorsConfig>,
    remove_trailing_slash: bool,
    multi_tenant: bool,
    service_name: String,
    service_version: String,
}

impl ServerConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            body_limit: DEFAULT_BODY_LIMIT,
            cors: None,
            remove_trailing_slash: true,
            multi_tenant: false,
            service_name: "fabriq".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Sets the HTTP bind address.
    #[must_use]
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.http_addr = addr.into();
        self
    }

    /// Sets the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the maximum body size in bytes.
    #[must_use]
    pub fn body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    /// Enables CORS with the given settings.
    #[must_use]
    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.cors = Some(cors);
        self
    }

    /// Sets whether a trailing slash is ignored when routing.
    #[must_use]
    pub fn remove_trailing_slash(mut self, enabled: bool) -> Self {
        self.remove_trailing_slash = enabled;
        self
    }

    /// Sets whether the token issuer selects the tenant.
    #[must_use]
    pub fn multi_tenant(mut self, enabled: bool) -> Self {
        self.multi_tenant = enabled;
        self
    }

    /// Sets the service name reported by `/health`.
    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Sets the service version reported by `/health`.
    #[must_use]
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            http_addr: self.http_addr,
            shutdown_timeout: self.shutdown_timeout,
            request_timeout: self.request_timeout,
            body_limit: self.body_limit,
            cors: self.cors,
            remove_trailing_slash: self.remove_trailing_slash,
            multi_tenant: self.multi_tenant,
            service_name: self.service_name,
            service_version: self.service_version,
        }
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
