//! Structured logging and metrics for Agora.
//!
//! - **Logging**: `tracing` events written by `tracing-subscriber`, JSON or pretty
//! - **Metrics**: counters and histograms through the `metrics` facade
//!
//! The binary installs a subscriber once at startup with [`init_telemetry`].
//! Libraries only emit events and record metrics; both are no-ops until a
//! subscriber or recorder is installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use agora_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::new("items-api").with_environment("production");
//! init_telemetry(&config)?;
//! ```

#![doc(html_root_url = "https://docs.rs/agora-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use error::TelemetryError;
pub use logging::{fields, init_logging, LogConfig, LogFormat};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging and registers metric descriptions.
///
/// # Errors
///
/// Returns `TelemetryError` if the subscriber cannot be installed.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    metrics::describe_metrics();
    tracing::debug!(
        service = %config.service_name,
        environment = %config.environment,
        "telemetry initialized"
    );
    Ok(())
}
