//! Structured logging.
//!
//! Events are emitted with `tracing` and written by a `tracing-subscriber`
//! formatter, JSON lines in production and pretty output in development.
//!
//! ```rust,ignore
//! use agora_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default())?;
//! tracing::info!(operation_id = "getItem", "handling request");
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

/// Logging configuration (`[telemetry.logging]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Install a subscriber at all.
    pub enabled: bool,
    /// `EnvFilter` directive, e.g. `info` or `agora_middleware=debug,info`.
    /// `RUST_LOG` wins when set.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Include file and line of the call site.
    pub source_location: bool,
    /// Include the module path.
    pub targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            source_location: false,
            targets: true,
        }
    }
}

impl LogConfig {
    /// Pretty debug output with call sites.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            source_location: true,
            ..Self::default()
        }
    }

    /// JSON at `info`.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }
}

/// Installs the global subscriber. Does nothing when logging is disabled.
///
/// # Errors
///
/// [`TelemetryError::BadFilter`] for an unparsable directive and
/// [`TelemetryError::AlreadyInstalled`] when a subscriber is already set.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let directive = std::env::var("RUST_LOG")
        .ok()
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| config.level.clone());
    let filter = parse_filter(&directive)?;

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_file(config.source_location)
            .with_line_number(config.source_location)
            .with_target(config.targets)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(config.source_location)
            .with_line_number(config.source_location)
            .with_target(config.targets)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))
}

/// Parses an `EnvFilter` directive.
///
/// # Errors
///
/// [`TelemetryError::BadFilter`] naming the directive.
pub fn parse_filter(directive: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(directive).map_err(|e| TelemetryError::BadFilter {
        directive: directive.to_string(),
        reason: e.to_string(),
    })
}

/// Field names shared by every crate's events.
pub mod fields {
    /// Request id.
    pub const REQUEST_ID: &str = "request_id";
    /// Resolved operation id.
    pub const OPERATION_ID: &str = "operation_id";
    /// Pipeline stage a failure came from.
    pub const STAGE: &str = "stage";
    /// Classifier tier.
    pub const TIER: &str = "tier";
    /// Envelope error code.
    pub const CODE: &str = "code";
    /// HTTP method.
    pub const HTTP_METHOD: &str = "http.method";
    /// Request path.
    pub const HTTP_PATH: &str = "http.path";
    /// Response status.
    pub const HTTP_STATUS: &str = "http.status_code";
    /// Latency in milliseconds.
    pub const DURATION_MS: &str = "duration_ms";
    /// Datastore connect attempt number.
    pub const ATTEMPT: &str = "attempt";
}

/// Logs a finished request: `info` for 4xx/5xx, `debug` otherwise.
#[macro_export]
macro_rules! log_request_complete {
    ($request_id:expr, $operation:expr, $method:expr, $path:expr, $status:expr, $duration_ms:expr) => {{
        let status: u16 = $status;
        if status >= 400 {
            tracing::info!(
                request_id = %$request_id,
                operation_id = $operation.unwrap_or("-"),
                http.method = %$method,
                http.path = %$path,
                http.status_code = status,
                duration_ms = $duration_ms,
                "request completed"
            );
        } else {
            tracing::debug!(
                request_id = %$request_id,
                operation_id = $operation.unwrap_or("-"),
                http.method = %$method,
                http.path = %$path,
                http.status_code = status,
                duration_ms = $duration_ms,
                "request completed"
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let prod = LogConfig::production();
        assert_eq!(prod.format, LogFormat::Json);
        assert_eq!(prod.level, "info");
        assert!(!prod.source_location);

        let dev = LogConfig::development();
        assert_eq!(dev.format, LogFormat::Pretty);
        assert_eq!(dev.level, "debug");
        assert!(dev.source_location);
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"format":"pretty"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.level, "info");
        assert!(serde_json::from_str::<LogConfig>(r#"{"colour":true}"#).is_err());
    }

    #[test]
    fn test_parse_filter() {
        assert!(parse_filter("info").is_ok());
        assert!(parse_filter("agora_middleware=debug,warn").is_ok());
        let err = parse_filter("agora=loudest").unwrap_err();
        assert!(matches!(err, TelemetryError::BadFilter { ref directive, .. } if directive == "agora=loudest"));
    }

    #[test]
    fn test_disabled_installs_nothing() {
        let config = LogConfig {
            enabled: false,
            ..LogConfig::default()
        };
        assert!(init_logging(&config).is_ok());
    }
}
