//! Layered configuration loader.
//!
//! Layers, later ones winning:
//!
//! 1. built-in defaults (or a preset)
//! 2. a TOML or JSON file
//! 3. a `.env` file, outside production and staging only
//! 4. `AGORA__SECTION__KEY` overrides
//! 5. the well-known variables `PORT`, `DB_URI`, `MONGOHQ_URL`, `MONGOLAB_URI`

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use agora_telemetry::LogFormat;

use crate::{AgoraConfig, CompressionEffort, ConfigError};

/// Default prefix for environment overrides.
pub const DEFAULT_ENV_PREFIX: &str = "AGORA";

/// Variables checked, in order, for the datastore URI.
pub const DATASTORE_URI_VARS: [&str; 3] = ["DB_URI", "MONGOHQ_URL", "MONGOLAB_URI"];

/// Variables checked, in order, for the environment name.
pub const ENVIRONMENT_VARS: [&str; 2] = ["AGORA_ENV", "APP_ENV"];

/// Configuration loader with layered approach.
///
/// # Example
///
/// ```no_run
/// use agora_config::ConfigLoader;
///
/// # fn main() -> Result<(), agora_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("agora.toml")?
///     .with_dotenv()?
///     .with_env_prefix("AGORA")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: AgoraConfig,
    env_prefix: Option<String>,
    env: Option<HashMap<String, String>>,
    file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: AgoraConfig::default(),
            env_prefix: None,
            env: None,
            file: None,
        }
    }

    /// Start with the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = AgoraConfig::development();
        self
    }

    /// Start with the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = AgoraConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// The format is chosen by extension (`.toml` or `.json`). Sections the
    /// file leaves out keep their defaults; unknown fields are rejected.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::missing_file(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::unreadable(path, e))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        self.config = parse(&content, &format)?;
        self.file = Some(path.to_path_buf());
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in the given format (`toml` or `json`).
    ///
    /// ```
    /// use agora_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[server]\nport = 8081", "toml")
    ///     .unwrap()
    ///     .with_env_vars(Vec::<(String, String)>::new())
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.port, 8081);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = parse(content, &format.to_lowercase())?;
        Ok(self)
    }

    /// Loads `.env` into the process environment unless the environment is
    /// production or staging. A missing `.env` file is not an error.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        if self.environment_is_production() {
            tracing::debug!("skipping .env in production");
            return Ok(self);
        }
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err.into()),
        }
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Variables use the format `PREFIX__SECTION__KEY`, for example
    /// `AGORA__SESSION__COOKIE_NAME=sid`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Uses the given variables instead of the process environment.
    #[must_use]
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Returns the file that was loaded, if any.
    #[must_use]
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Applies environment overrides and validates.
    pub fn load(mut self) -> Result<AgoraConfig, ConfigError> {
        let vars = self.env.take().unwrap_or_else(|| env::vars().collect());

        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&vars, &prefix)?;
        }
        self.apply_well_known(&vars)?;

        self.config.validate()?;
        Ok(self.config)
    }

    /// Finalize without validation.
    #[must_use]
    pub fn load_unvalidated(self) -> AgoraConfig {
        self.config
    }

    fn environment_is_production(&self) -> bool {
        let from_env = ENVIRONMENT_VARS.iter().find_map(|name| match &self.env {
            Some(vars) => vars.get(*name).cloned(),
            None => env::var(name).ok(),
        });
        match from_env {
            Some(name) => matches!(name.as_str(), "production" | "staging"),
            None => self.config.is_production(),
        }
    }

    fn apply_well_known(&mut self, vars: &HashMap<String, String>) -> Result<(), ConfigError> {
        if let Some(port) = vars.get("PORT") {
            self.config.server.port = port
                .parse()
                .map_err(|_| ConfigError::bad_env_var("PORT", "expected port number"))?;
        }
        if let Some(uri) = DATASTORE_URI_VARS
            .iter()
            .find_map(|name| vars.get(*name).filter(|v| !v.is_empty()))
        {
            self.config.datastore.uri = uri.clone();
        }
        if let Some(env_name) = ENVIRONMENT_VARS
            .iter()
            .find_map(|name| vars.get(*name).filter(|v| !v.is_empty()))
        {
            self.config.telemetry.environment = env_name.clone();
        }
        Ok(())
    }

    fn apply_env_overrides(
        &mut self,
        vars: &HashMap<String, String>,
        prefix: &str,
    ) -> Result<(), ConfigError> {
        let mut keys: Vec<&String> = vars.keys().filter(|k| k.starts_with(prefix)).collect();
        keys.sort();
        for key in keys {
            self.apply_env_var(key, &vars[key], prefix)?;
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            return Ok(());
        };
        let parts: Vec<&str> = rest.split("__").collect();
        let c = &mut self.config;

        match parts.as_slice() {
            ["SERVER", "HOST"] => c.server.host = value.to_string(),
            ["SERVER", "PORT"] => c.server.port = parse_num(key, value)?,
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                c.server.shutdown_timeout_secs = parse_num(key, value)?;
            }
            ["SERVER", "BODY_TIMEOUT_SECS"] => c.server.body_timeout_secs = parse_num(key, value)?,
            ["SERVER", "MAX_BODY_BYTES"] => c.server.max_body_bytes = parse_num(key, value)?,
            ["SERVER", "TRUST_REQUEST_ID"] => c.server.trust_request_id = parse_flag(key, value)?,

            ["DATASTORE", "URI"] => c.datastore.uri = value.to_string(),
            ["DATASTORE", "RETRY_DELAY_SECS"] => {
                c.datastore.retry_delay_secs = parse_num(key, value)?;
            }

            ["SESSION", "ENABLED"] => c.session.enabled = parse_flag(key, value)?,
            ["SESSION", "COOKIE_NAME"] => c.session.cookie_name = value.to_string(),
            ["SESSION", "SECURE"] => c.session.secure = parse_flag(key, value)?,
            ["SESSION", "HTTP_ONLY"] => c.session.http_only = parse_flag(key, value)?,
            ["SESSION", "MAX_AGE_SECS"] => c.session.max_age_secs = parse_optional_num(key, value)?,
            ["SESSION", "IDLE_TTL_SECS"] => c.session.idle_ttl_secs = parse_num(key, value)?,

            ["STATIC_FILES", "ENABLED"] => c.static_files.enabled = parse_flag(key, value)?,
            ["STATIC_FILES", "DIR"] => c.static_files.dir = PathBuf::from(value),
            ["STATIC_FILES", "INDEX"] => c.static_files.index = non_empty(value),
            ["STATIC_FILES", "CACHE_CONTROL"] => c.static_files.cache_control = non_empty(value),

            ["CORS", "ALLOWED_ORIGINS"] => {
                c.cors.allowed_origins = value
                    .split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            ["CORS", "ALLOW_CREDENTIALS"] => c.cors.allow_credentials = parse_flag(key, value)?,
            ["CORS", "MAX_AGE_SECS"] => c.cors.max_age_secs = parse_optional_num(key, value)?,

            ["COMPRESSION", "ENABLED"] => c.compression.enabled = parse_flag(key, value)?,
            ["COMPRESSION", "MIN_SIZE"] => c.compression.min_size = parse_num(key, value)?,
            ["COMPRESSION", "LEVEL"] => {
                c.compression.level = match value.to_lowercase().as_str() {
                    "fast" => CompressionEffort::Fast,
                    "default" => CompressionEffort::Default,
                    "best" => CompressionEffort::Best,
                    _ => {
                        return Err(ConfigError::bad_env_var(
                            key,
                            "expected 'fast', 'default' or 'best'",
                        ))
                    }
                };
            }

            ["SCHEMA", "PATH"] => c.schema.path = PathBuf::from(value),
            ["SCHEMA", "DISTINGUISH_METHOD_NOT_ALLOWED"] => {
                c.schema.distinguish_method_not_allowed = parse_flag(key, value)?;
            }
            ["SCHEMA", "SERVE_DOCS"] => c.schema.serve_docs = parse_flag(key, value)?,
            ["SCHEMA", "DOCS_PATH"] => c.schema.docs_path = value.to_string(),
            ["SCHEMA", "MOCK_UNBOUND"] => c.schema.mock_unbound = parse_flag(key, value)?,

            ["CACHE", "DEFAULT_TTL_SECS"] => c.cache.default_ttl_secs = parse_optional_num(key, value)?,

            ["TELEMETRY", "SERVICE_NAME"] => c.telemetry.service_name = value.to_string(),
            ["TELEMETRY", "ENVIRONMENT"] => c.telemetry.environment = value.to_string(),
            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                c.telemetry.logging.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => c.telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                c.telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => return Err(ConfigError::bad_env_var(key, "expected 'json' or 'pretty'")),
                };
            }

            ["TEMP_DIR"] => c.temp_dir = PathBuf::from(value),

            _ => tracing::warn!(var = key, "ignoring unknown configuration variable"),
        }

        Ok(())
    }
}

fn parse(content: &str, format: &str) -> Result<AgoraConfig, ConfigError> {
    match format {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        other => Err(ConfigError::UnknownFormat(other.to_string())),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::bad_env_var(key, "expected integer"))
}

fn parse_optional_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<Option<T>, ConfigError> {
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    parse_num(key, value).map(Some)
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::bad_env_var(key, "expected boolean"))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
