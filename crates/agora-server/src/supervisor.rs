//! Datastore connection supervisor.
//!
//! Boot is gated on the datastore: nothing downstream (schema, pipeline,
//! listener) exists until a connect succeeds. The supervisor retries forever
//! with a fixed delay and then runs the boot continuation exactly once.
//!
//! ```text
//! Disconnected ──boot──▶ Connecting ──ok──▶ Connected (terminal)
//!                          ▲    │
//!                    timer │    │ error
//!                          │    ▼
//!                       FailedRetrying
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agora_core::BoxFuture;
use agora_telemetry::metrics::record_connect_attempt;
use tokio::sync::watch;

use crate::datastore::Datastore;

/// Default delay between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Lifecycle of the datastore connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No attempt made yet.
    Disconnected,
    /// An attempt is in progress.
    Connecting,
    /// Connected. Terminal for the process.
    Connected,
    /// The last attempt failed; waiting for the retry timer.
    FailedRetrying,
}

impl ConnectionState {
    /// Returns the state name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::FailedRetrying => "failed_retrying",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Waits out the retry delay.
pub trait Sleeper: Send + Sync + 'static {
    /// Completes after `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()>;
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Owns the datastore connection lifecycle.
///
/// # Example
///
/// ```ignore
/// let datastore = Arc::new(TcpProbeDatastore::from_uri(&config.datastore.uri)?);
/// let supervisor = ConnectionSupervisor::new(datastore, config.datastore.retry_delay());
///
/// // Runs once the datastore answers; everything else is built in here.
/// supervisor.supervise(|| async { serve(config).await }).await?;
/// ```
pub struct ConnectionSupervisor {
    datastore: Arc<dyn Datastore>,
    sleeper: Arc<dyn Sleeper>,
    retry_delay: Duration,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
}

impl ConnectionSupervisor {
    /// Creates a supervisor that waits `retry_delay` between attempts.
    #[must_use]
    pub fn new(datastore: Arc<dyn Datastore>, retry_delay: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            datastore,
            sleeper: Arc::new(TokioSleeper),
            retry_delay,
            state,
            attempts: AtomicU32::new(0),
        }
    }

    /// Replaces the retry timer.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Returns how many connects have been attempted.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns `true` once connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the configured retry delay.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Connects, retrying until the datastore answers, then runs `boot` and
    /// returns its output.
    ///
    /// There is no retry limit. Dropping the returned future stops retrying.
    pub async fn supervise<F, Fut>(&self, boot: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let target = self.datastore.describe();
        loop {
            self.transition(ConnectionState::Connecting);
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::info!(attempt, datastore = %target, "connecting to datastore");

            match self.datastore.connect().await {
                Ok(()) => {
                    record_connect_attempt(true);
                    self.transition(ConnectionState::Connected);
                    tracing::info!(attempt, datastore = %target, "connected to datastore");
                    break;
                }
                Err(error) => {
                    record_connect_attempt(false);
                    self.transition(ConnectionState::FailedRetrying);
                    tracing::error!(
                        attempt,
                        datastore = %target,
                        error = %error,
                        retry_in_secs = self.retry_delay.as_secs_f64(),
                        "failed to connect to datastore on startup; retrying"
                    );
                    self.sleeper.sleep(self.retry_delay).await;
                }
            }
        }

        boot().await
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "connection state changed");
        }
    }
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("datastore", &self.datastore.describe())
            .field("retry_delay", &self.retry_delay)
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}
