//! Server error types.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from binding and running the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The scratch directory could not be created.
    #[error("failed to create temp directory {}: {source}", path.display())]
    TempDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Any other I/O failure on the listener.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from reaching the datastore.
#[derive(Debug, Error)]
pub enum DatastoreError {
    /// The URI could not be understood.
    #[error("invalid datastore URI '{uri}': {reason}")]
    InvalidUri {
        /// The offending URI.
        uri: String,
        /// What is wrong with it.
        reason: String,
    },

    /// None of the hosts accepted a connection.
    #[error("datastore unreachable at {target}: {source}")]
    Unreachable {
        /// Host and port that was tried last.
        target: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The connect attempt did not finish in time.
    #[error("datastore connect to {target} timed out")]
    Timeout {
        /// Host and port that was tried.
        target: String,
    },
}

impl DatastoreError {
    pub(crate) fn invalid_uri(uri: &str, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }
}
