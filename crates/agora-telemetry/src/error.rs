//! Telemetry errors.

use thiserror::Error;

/// Why logging could not be set up.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was installed earlier in the process.
    #[error("a log subscriber is already installed: {0}")]
    AlreadyInstalled(String),

    /// The level directive does not parse.
    #[error("bad log filter '{directive}': {reason}")]
    BadFilter {
        /// The directive as configured.
        directive: String,
        /// Parser message.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_filter_display() {
        let err = TelemetryError::BadFilter {
            directive: "agora=loudest".to_string(),
            reason: "invalid level".to_string(),
        };
        assert_eq!(err.to_string(), "bad log filter 'agora=loudest': invalid level");
    }
}
