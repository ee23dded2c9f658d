//! Root configuration type.

use agora_telemetry::logging::parse_filter;
use agora_telemetry::{LogConfig, TelemetryConfig};
use serde::Deserialize;
use std::path::PathBuf;

use crate::{
    CacheSection, CompressionSection, ConfigError, CorsSection, DatastoreConfig, SchemaSection,
    ServerConfig, SessionSection, StaticFilesSection,
};

/// Upper bound for every configured lifetime (ten years).
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Complete Agora server configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and the
/// environment.
///
/// # Example
///
/// ```
/// use agora_config::AgoraConfig;
///
/// let config = AgoraConfig::default();
/// assert_eq!(config.server.port, 3000);
/// assert_eq!(config.session.cookie_name, "JSESSION");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgoraConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Datastore connection settings.
    #[serde(default)]
    pub datastore: DatastoreConfig,

    /// Session cookie settings.
    #[serde(default)]
    pub session: SessionSection,

    /// Static file settings.
    #[serde(default)]
    pub static_files: StaticFilesSection,

    /// Cross-origin settings.
    #[serde(default)]
    pub cors: CorsSection,

    /// Response compression settings.
    #[serde(default)]
    pub compression: CompressionSection,

    /// Interface schema location and validator switches.
    #[serde(default)]
    pub schema: SchemaSection,

    /// Ephemeral cache settings.
    #[serde(default)]
    pub cache: CacheSection,

    /// Logging and service identity.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Scratch directory created after the listener binds.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

impl Default for AgoraConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            datastore: DatastoreConfig::default(),
            session: SessionSection::default(),
            static_files: StaticFilesSection::default(),
            cors: CorsSection::default(),
            compression: CompressionSection::default(),
            schema: SchemaSection::default(),
            cache: CacheSection::default(),
            telemetry: TelemetryConfig::default(),
            temp_dir: default_temp_dir(),
        }
    }
}

impl AgoraConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> AgoraConfigBuilder {
        AgoraConfigBuilder::new()
    }

    /// Returns `true` when running in production or staging.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.telemetry.is_production()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;
        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port", "must not be 0"));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::invalid("server.max_body_bytes", "must be positive"));
        }
        if self.server.body_timeout_secs == 0 {
            return Err(ConfigError::invalid("server.body_timeout_secs", "must be positive"));
        }

        if !self.datastore.uri.contains("://") {
            return Err(ConfigError::invalid(
                "datastore.uri",
                format!("expected scheme://host[:port], got '{}'", self.datastore.uri),
            ));
        }
        if self.datastore.retry_delay_secs == 0 {
            return Err(ConfigError::invalid(
                "datastore.retry_delay_secs",
                "must be positive",
            ));
        }

        if self.schema.serve_docs && !self.schema.docs_path.starts_with('/') {
            return Err(ConfigError::invalid("schema.docs_path", "must start with '/'"));
        }

        let cookie = &self.session.cookie_name;
        if cookie.is_empty() || !cookie.bytes().all(is_cookie_name_byte) {
            return Err(ConfigError::invalid(
                "session.cookie_name",
                format!("not a valid cookie name: '{cookie}'"),
            ));
        }

        for (key, secs) in [
            ("session.max_age_secs", self.session.max_age_secs),
            ("session.idle_ttl_secs", Some(self.session.idle_ttl_secs)),
            ("cache.default_ttl_secs", self.cache.default_ttl_secs),
        ] {
            if secs.is_some_and(|secs| secs > MAX_TTL_SECS) {
                return Err(ConfigError::invalid(
                    key,
                    format!("must be at most {MAX_TTL_SECS} seconds"),
                ));
            }
        }
        if self.session.idle_ttl_secs == 0 {
            return Err(ConfigError::invalid("session.idle_ttl_secs", "must be positive"));
        }

        if self.cors.allowed_origins.iter().any(String::is_empty) {
            return Err(ConfigError::invalid("cors.allowed_origins", "empty origin"));
        }

        if self.schema.path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("schema.path", "must not be empty"));
        }

        if self.telemetry.logging.enabled {
            parse_filter(&self.telemetry.logging.level)
                .map_err(|e| ConfigError::invalid("telemetry.logging.level", e.to_string()))?;
        }

        Ok(())
    }

    /// Development preset: pretty debug logs.
    ///
    /// ```
    /// use agora_config::AgoraConfig;
    ///
    /// let config = AgoraConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.telemetry.environment = "development".to_string();
        config.telemetry.logging = LogConfig::development();
        config
    }

    /// Production preset: JSON logs and secure session cookies.
    ///
    /// ```
    /// use agora_config::AgoraConfig;
    ///
    /// let config = AgoraConfig::production();
    /// assert!(config.is_production());
    /// assert!(config.session.secure);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.telemetry.environment = "production".to_string();
        config.telemetry.logging = LogConfig::production();
        config.session.secure = true;
        config
    }
}

// RFC 6265 token characters.
fn is_cookie_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Builder for [`AgoraConfig`].
#[derive(Debug, Default)]
pub struct AgoraConfigBuilder {
    config: AgoraConfig,
}

impl AgoraConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server configuration.
    #[must_use]
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.config.server = server;
        self
    }

    /// Set the datastore configuration.
    #[must_use]
    pub fn datastore(mut self, datastore: DatastoreConfig) -> Self {
        self.config.datastore = datastore;
        self
    }

    /// Set the session configuration.
    #[must_use]
    pub fn session(mut self, session: SessionSection) -> Self {
        self.config.session = session;
        self
    }

    /// Set the static file configuration.
    #[must_use]
    pub fn static_files(mut self, static_files: StaticFilesSection) -> Self {
        self.config.static_files = static_files;
        self
    }

    /// Set the CORS configuration.
    #[must_use]
    pub fn cors(mut self, cors: CorsSection) -> Self {
        self.config.cors = cors;
        self
    }

    /// Set the schema configuration.
    #[must_use]
    pub fn schema(mut self, schema: SchemaSection) -> Self {
        self.config.schema = schema;
        self
    }

    /// Set the telemetry configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.config.telemetry = telemetry;
        self
    }

    /// Set the temp directory.
    #[must_use]
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = dir.into();
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> AgoraConfig {
        self.config
    }
}
