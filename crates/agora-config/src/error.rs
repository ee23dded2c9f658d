//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Why a configuration could not be produced.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required config file does not exist.
    #[error("config file {path} does not exist")]
    MissingFile {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// A config file exists but could not be read.
    #[error("cannot read config file {path}")]
    Unreadable {
        /// The file.
        path: PathBuf,
        /// The I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The TOML did not match the config layout.
    #[error("bad TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// The JSON did not match the config layout.
    #[error("bad JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// Neither `toml` nor `json`.
    #[error("unknown config format '{0}'")]
    UnknownFormat(String),

    /// A value loaded fine but is unusable.
    #[error("{field}: {reason}")]
    Invalid {
        /// Dotted path of the field, e.g. `server.port`.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An environment variable could not be interpreted.
    #[error("environment variable {var}: {reason}")]
    BadEnvVar {
        /// The variable.
        var: String,
        /// What was expected.
        reason: String,
    },

    /// `.env` exists but is malformed.
    #[error(".env: {0}")]
    Dotenv(#[from] dotenvy::Error),
}

impl ConfigError {
    pub(crate) fn missing_file(path: impl Into<PathBuf>) -> Self {
        Self::MissingFile { path: path.into() }
    }

    pub(crate) fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Unreadable {
            path: path.into(),
            source,
        }
    }

    /// An unusable value at `field`.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn bad_env_var(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadEnvVar {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// Returns the offending field or variable, when there is one.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            Self::BadEnvVar { var, .. } => Some(var),
            _ => None,
        }
    }
}
