//! Layered configuration loader.

use std::env;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::{ConfigError, FabriqConfig};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "FABRIQ";

/// Loads [`FabriqConfig`] in layers, later layers overriding earlier ones:
///
/// 1. defaults
/// 2. a TOML or JSON file
/// 3. a dotenv file
/// 4. process environment variables `PREFIX__SECTION__KEY`
///
/// # Example
///
/// ```no_run
/// use fabriq_config::ConfigLoader;
///
/// # fn main() -> Result<(), fabriq_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("fabriq.toml")?
///     .with_dotenv()?
///     .with_env_prefix("FABRIQ")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: FabriqConfig,
    env_prefix: Option<String>,
    dotenv: Vec<(String, String)>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: FabriqConfig::default(),
            env_prefix: None,
            dotenv: Vec::new(),
        }
    }

    /// Starts from the development preset.
    ///
    /// ```
    /// use fabriq_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = FabriqConfig::development();
        self
    }

    /// Loads a `.toml` or `.json` file, chosen by extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable or invalid.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.display().to_string()))?;

        self.config = parse(&content, &format)?;
        debug!(path = %path.display(), "loaded configuration file");
        Ok(self)
    }

    /// Like [`with_file`](Self::with_file), but a missing file is skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is unreadable or invalid.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Loads configuration from a string in `"toml"` or `"json"` format.
    ///
    /// ```
    /// use fabriq_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[server]\nhttp_addr = \"127.0.0.1:3000\"", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    /// assert_eq!(config.server.http_addr, "127.0.0.1:3000");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails or the format is unknown.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = parse(content, &format.to_lowercase())?;
        Ok(self)
    }

    /// Reads `.env` from the working directory, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        let path = Path::new(".env");
        if path.exists() {
            self.with_dotenv_file(path)
        } else {
            Ok(self)
        }
    }

    /// Reads override variables from a dotenv file.
    ///
    /// The process environment is left untouched. The variables apply at
    /// [`load`](Self::load), below real environment variables, using the env
    /// prefix or [`DEFAULT_ENV_PREFIX`] when none is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn with_dotenv_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let dotenv_error = |reason: String| ConfigError::DotenvError {
            path: path.to_path_buf(),
            reason,
        };

        let entries = dotenvy::from_path_iter(path).map_err(|e| dotenv_error(e.to_string()))?;
        for entry in entries {
            self.dotenv.push(entry.map_err(|e| dotenv_error(e.to_string()))?);
        }
        Ok(self)
    }

    /// Applies overrides from variables named `PREFIX__SECTION__KEY`.
    ///
    /// For example with prefix `FABRIQ`:
    /// - `FABRIQ__SERVER__HTTP_ADDR=0.0.0.0:9000`
    /// - `FABRIQ__AUTH__MULTI_TENANT=true`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Applies overrides and validates.
    ///
    /// # Errors
    ///
    /// Returns an error if an override cannot be parsed or validation fails.
    pub fn load(mut self) -> Result<FabriqConfig, ConfigError> {
        let prefix = self.env_prefix.take();
        let dotenv_prefix = prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
        for (key, value) in std::mem::take(&mut self.dotenv) {
            self.apply_env_var(&key, &value, dotenv_prefix)?;
        }

        if let Some(prefix) = prefix {
            let vars: Vec<(String, String)> = env::vars()
                .filter(|(k, _)| k.starts_with(&prefix))
                .collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the configuration without overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> FabriqConfig {
        self.config
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(path) = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
        else {
            return Ok(());
        };

        let config = &mut self.config;
        let parts: Vec<&str> = path.split("__").collect();

        match parts.as_slice() {
            ["SERVER", "HTTP_ADDR"] => config.server.http_addr = value.to_string(),
            ["SERVER", "REQUEST_TIMEOUT_SECS"] => {
                config.server.request_timeout_secs = parse_u64(key, value)?;
            }
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.server.shutdown_timeout_secs = parse_u64(key, value)?;
            }
            ["SERVER", "BODY_LIMIT"] => config.server.body_limit = value.to_string(),
            ["SERVER", "REMOVE_TRAILING_SLASH"] => {
                config.server.remove_trailing_slash = parse_bool_var(key, value)?;
            }
            ["SERVER", "CORS", "ALLOW_ORIGINS"] => {
                config.server.cors.get_or_insert_with(Default::default).allow_origins =
                    split_list(value);
            }

            ["AUTH", "ENABLED"] => config.auth.enabled = parse_bool_var(key, value)?,
            ["AUTH", "MULTI_TENANT"] => config.auth.multi_tenant = parse_bool_var(key, value)?,
            ["AUTH", "JWT_SECRET"] => {
                config.auth.jwt_secret = Some(value.to_string()).filter(|s| !s.is_empty());
            }

            ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => config.logging.format = value.to_lowercase(),

            ["SERVICE", "NAME"] => config.service.name = value.to_string(),
            ["SERVICE", "VERSION"] => config.service.version = value.to_string(),

            _ => debug!(var = key, "ignoring unknown configuration variable"),
        }

        Ok(())
    }
}

fn parse(content: &str, format: &str) -> Result<FabriqConfig, ConfigError> {
    match format {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn parse_bool_var(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // Process environment overrides are exercised through `apply_env_var`
    // and dotenv files; mutating the real environment is unsafe.

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, FabriqConfig::default());
    }

    #[test]
    fn test_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [server]
            http_addr = "127.0.0.1:3000"
            body_limit = "512K"

            [server.cors]
            allow_origins = ["https://app.example.com"]

            [auth]
            enabled = true
            multi_tenant = true
            jwt_secret = "s3cret"

            [service]
            name = "orders"
            "#
        )
        .unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.server.http_addr, "127.0.0.1:3000");
        assert_eq!(config.server.body_limit, "512K");
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(
            config.server.cors.unwrap().allow_origins,
            ["https://app.example.com"]
        );
        assert!(config.auth.multi_tenant);
        assert_eq!(config.service.name, "orders");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"logging": {{"level": "warn", "format": "pretty"}}}}"#).unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ConfigLoader::new()
            .with_string("[server]\nport = 80", "toml")
            .unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        assert!(matches!(
            ConfigLoader::new().with_file("/definitely/missing.toml"),
            Err(ConfigError::FileNotFound { .. })
        ));
        assert!(ConfigLoader::new()
            .with_optional_file("/definitely/missing.toml")
            .is_ok());

        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(matches!(
            ConfigLoader::new().with_file(file.path()),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_apply_env_var() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__SERVER__HTTP_ADDR", "192.168.1.1:9000", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__AUTH__MULTI_TENANT", "yes", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__SERVER__CORS__ALLOW_ORIGINS", "a.com, b.com,", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__SOMETHING__ELSE", "x", "TEST")
            .unwrap();

        let config = loader.load_unvalidated();
        assert_eq!(config.server.http_addr, "192.168.1.1:9000");
        assert!(config.auth.multi_tenant);
        assert_eq!(config.server.cors.unwrap().allow_origins, ["a.com", "b.com"]);
    }

    #[test]
    fn test_apply_env_var_parse_errors() {
        let mut loader = ConfigLoader::new();
        assert!(matches!(
            loader.apply_env_var("TEST__AUTH__ENABLED", "maybe", "TEST"),
            Err(ConfigError::EnvParseError { .. })
        ));
        assert!(loader
            .apply_env_var("TEST__SERVER__REQUEST_TIMEOUT_SECS", "soon", "TEST")
            .is_err());
    }

    #[test]
    fn test_dotenv_file_overrides_file_values() {
        let mut dotenv = tempfile::NamedTempFile::new().unwrap();
        writeln!(dotenv, "FBQTEST__SERVICE__NAME=billing").unwrap();
        writeln!(dotenv, "FBQTEST__SERVER__BODY_LIMIT=1M").unwrap();
        writeln!(dotenv, "UNRELATED=1").unwrap();

        let config = ConfigLoader::new()
            .with_string("[service]\nname = \"orders\"", "toml")
            .unwrap()
            .with_dotenv_file(dotenv.path())
            .unwrap()
            .with_env_prefix("FBQTEST")
            .load()
            .unwrap();

        assert_eq!(config.service.name, "billing");
        assert_eq!(config.server.body_limit, "1M");
    }

    #[test]
    fn test_dotenv_file_uses_default_prefix() {
        let mut dotenv = tempfile::NamedTempFile::new().unwrap();
        writeln!(dotenv, "FABRIQ__LOGGING__LEVEL=trace").unwrap();

        let config = ConfigLoader::new()
            .with_dotenv_file(dotenv.path())
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_load_validates() {
        let err = ConfigLoader::new()
            .with_string(r#"{"auth": {"enabled": true}}"#, "json")
            .unwrap()
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nope"), None);
    }
}
