//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::ConfigError;

/// Server configuration section.
///
/// # Example
///
/// ```
/// use agora_config::ServerConfig;
///
/// let config = ServerConfig {
///     port: 8080,
///     ..Default::default()
/// };
/// assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:8080");
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port. The `PORT` environment variable overrides it.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown drain timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Time allowed to receive a request body, in seconds.
    #[serde(default = "default_body_timeout")]
    pub body_timeout_secs: u64,

    /// Largest accepted request body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Reuse a valid incoming `X-Request-ID` instead of generating one.
    #[serde(default)]
    pub trust_request_id: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            body_timeout_secs: default_body_timeout(),
            max_body_bytes: default_max_body_bytes(),
            trust_request_id: false,
        }
    }
}

impl ServerConfig {
    /// Returns the socket address to bind.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `host` is not an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.host.parse().map_err(|_| {
            ConfigError::invalid("server.host", format!("not an IP address: {}", self.host))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Returns the shutdown drain timeout.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Returns the body read timeout.
    #[must_use]
    pub fn body_timeout(&self) -> Duration {
        Duration::from_secs(self.body_timeout_secs)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_body_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Default datastore URI when neither environment nor file sets one.
pub const DEFAULT_DATASTORE_URI: &str = "mongodb://localhost:27017/agora";

/// Datastore connection section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DatastoreConfig {
    /// Connection URI. `DB_URI`, `MONGOHQ_URL` and `MONGOLAB_URI` take precedence.
    pub uri: String,

    /// Fixed delay between connection attempts, in seconds.
    pub retry_delay_secs: u64,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_DATASTORE_URI.to_string(),
            retry_delay_secs: 5,
        }
    }
}

impl DatastoreConfig {
    /// Returns the retry delay.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Session cookie section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    /// Whether sessions are enabled.
    pub enabled: bool,
    /// Cookie name.
    pub cookie_name: String,
    /// Adds `Secure` to the cookie.
    pub secure: bool,
    /// Adds `HttpOnly` to the cookie.
    pub http_only: bool,
    /// Session lifetime in seconds; unset for a browser-session cookie.
    pub max_age_secs: Option<u64>,
    /// How long the in-memory store keeps a session with no `max_age_secs`.
    pub idle_ttl_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            cookie_name: "JSESSION".to_string(),
            secure: false,
            http_only: true,
            max_age_secs: None,
            idle_ttl_secs: 86_400,
        }
    }
}

/// Static file section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StaticFilesSection {
    /// Whether static files are served.
    pub enabled: bool,
    /// Directory to serve from.
    pub dir: PathBuf,
    /// File served for directory requests.
    pub index: Option<String>,
    /// `Cache-Control` value for served files.
    pub cache_control: Option<String>,
}

impl Default for StaticFilesSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("public"),
            index: Some("index.html".to_string()),
            cache_control: Some("public, max-age=0".to_string()),
        }
    }
}

/// Cross-origin section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CorsSection {
    /// Allowed origins; `"*"` allows any.
    pub allowed_origins: Vec<String>,
    /// Sends `Access-Control-Allow-Credentials: true`.
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds.
    pub max_age_secs: Option<u64>,
}

impl Default for CorsSection {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: false,
            max_age_secs: Some(86_400),
        }
    }
}

/// Compression effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionEffort {
    /// Fastest.
    Fast,
    /// Balanced.
    #[default]
    Default,
    /// Smallest output.
    Best,
}

/// Response compression section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionSection {
    /// Whether responses are compressed.
    pub enabled: bool,
    /// Smallest body worth compressing, in bytes.
    pub min_size: usize,
    /// Compression effort.
    pub level: CompressionEffort,
}

impl Default for CompressionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 1024,
            level: CompressionEffort::Default,
        }
    }
}

/// Interface schema section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaSection {
    /// Path of the JSON or TOML interface schema.
    pub path: PathBuf,
    /// Answer 405 instead of 404 when only the method is wrong.
    pub distinguish_method_not_allowed: bool,
    /// Serve the loaded schema as JSON at `docs_path`.
    pub serve_docs: bool,
    /// Where the schema document is served.
    pub docs_path: String,
    /// Answer operations without a handler from their declared examples.
    pub mock_unbound: bool,
}

impl Default for SchemaSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("interface.json"),
            distinguish_method_not_allowed: false,
            serve_docs: false,
            docs_path: "/api-docs".to_string(),
            mock_unbound: false,
        }
    }
}

/// Ephemeral cache section.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    /// TTL for entries set without one, in seconds.
    pub default_ttl_secs: Option<u64>,
}

impl CacheSection {
    /// Returns the default TTL.
    #[must_use]
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}
