//! The `[telemetry]` config section.

use crate::logging::LogConfig;
use serde::Deserialize;

/// Service identity and logging.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Name in startup logs.
    pub service_name: String,
    /// Deployment environment, exposed to requests as `Environment`.
    pub environment: String,
    /// Subscriber settings.
    pub logging: LogConfig,
}

impl TelemetryConfig {
    /// Defaults under another service name.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    /// Sets the environment name.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Replaces the logging settings.
    #[must_use]
    pub fn with_logging(mut self, logging: LogConfig) -> Self {
        self.logging = logging;
        self
    }

    /// `true` for `production` and `staging`.
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self.environment.as_str(), "production" | "staging")
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "agora".to_string(),
            environment: "development".to_string(),
            logging: LogConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "agora");
        assert!(!config.is_production());
    }

    #[test]
    fn test_staging_counts_as_production() {
        let config = TelemetryConfig::new("items-api")
            .with_environment("staging")
            .with_logging(LogConfig::development());
        assert_eq!(config.service_name, "items-api");
        assert!(config.is_production());
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_section_from_toml() {
        let config: TelemetryConfig =
            toml::from_str("service_name = \"slots\"\n[logging]\nlevel = \"warn\"\n").unwrap();
        assert_eq!(config.service_name, "slots");
        assert_eq!(config.environment, "development");
        assert_eq!(config.logging.level, "warn");
    }
}
