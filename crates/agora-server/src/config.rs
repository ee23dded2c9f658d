//! Listener options.
//!
//! # Example
//!
//! ```rust
//! use agora_server::ServerOptions;
//! use std::time::Duration;
//!
//! let options = ServerOptions::builder()
//!     .addr(([127, 0, 0, 1], 8080).into())
//!     .shutdown_timeout(Duration::from_secs(10))
//!     .build();
//!
//! assert_eq!(options.addr().port(), 8080);
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default shutdown drain timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default body read timeout in seconds.
pub const DEFAULT_BODY_TIMEOUT_SECS: u64 = 30;

/// Default body size limit.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Options for [`Server`](crate::Server).
#[derive(Debug, Clone)]
pub struct ServerOptions {
    addr: SocketAddr,
    shutdown_timeout: Duration,
    body_timeout: Duration,
    max_body_bytes: usize,
    temp_dir: Option<PathBuf>,
}

impl ServerOptions {
    /// Creates an options builder.
    #[must_use]
    pub fn builder() -> ServerOptionsBuilder {
        ServerOptionsBuilder::new()
    }

    /// Returns the bind address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns how long shutdown waits for open connections.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns how long a request body may take to arrive.
    #[must_use]
    pub fn body_timeout(&self) -> Duration {
        self.body_timeout
    }

    /// Returns the largest accepted request body.
    #[must_use]
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Returns the scratch directory created after binding.
    #[must_use]
    pub fn temp_dir(&self) -> Option<&Path> {
        self.temp_dir.as_deref()
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ServerOptions`].
#[derive(Debug, Clone)]
pub struct ServerOptionsBuilder {
    options: ServerOptions,
}

impl ServerOptionsBuilder {
    /// Creates a builder bound to `0.0.0.0:3000` by default.
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: ServerOptions {
                addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
                shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
                body_timeout: Duration::from_secs(DEFAULT_BODY_TIMEOUT_SECS),
                max_body_bytes: DEFAULT_MAX_BODY_BYTES,
                temp_dir: None,
            },
        }
    }

    /// Sets the bind address. Port 0 picks a free port.
    #[must_use]
    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.options.addr = addr;
        self
    }

    /// Sets the shutdown drain timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.options.shutdown_timeout = timeout;
        self
    }

    /// Sets the body read timeout.
    #[must_use]
    pub fn body_timeout(mut self, timeout: Duration) -> Self {
        self.options.body_timeout = timeout;
        self
    }

    /// Sets the body size limit.
    #[must_use]
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.options.max_body_bytes = limit;
        self
    }

    /// Creates this directory once the listener is bound.
    #[must_use]
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.temp_dir = Some(dir.into());
        self
    }

    /// Builds the options.
    #[must_use]
    pub fn build(self) -> ServerOptions {
        self.options
    }
}

impl Default for ServerOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
