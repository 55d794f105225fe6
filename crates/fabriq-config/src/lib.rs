//! Typed, layered configuration for Fabriq services.
//!
//! Defaults, then a TOML or JSON file, then a dotenv file, then environment
//! variables. Unknown keys in files are rejected.
//!
//! # Example
//!
//! ```no_run
//! use fabriq_config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("fabriq.toml")?
//!     .with_dotenv()?
//!     .with_env_prefix(fabriq_config::DEFAULT_ENV_PREFIX)
//!     .load()?;
//!
//! let server_config = config.server_config()?;
//! println!("listening on {}", server_config.http_addr());
//! # Ok(())
//! # }
//! ```
//!
//! # File format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! request_timeout_secs = 30
//! shutdown_timeout_secs = 30
//! body_limit = "2M"
//! remove_trailing_slash = true
//!
//! [server.cors]
//! allow_origins = ["https://app.example.com"]
//!
//! [auth]
//! enabled = true
//! multi_tenant = true
//! jwt_secret = "change-me"
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [service]
//! name = "orders"
//! version = "1.4.0"
//! ```

mod config;
mod error;
mod loader;

pub use config::{
    parse_body_limit, AuthSection, CorsSection, FabriqConfig, LoggingSection, ServerSection,
    ServiceSection,
};
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
