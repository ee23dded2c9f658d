//! Boot errors.

use thiserror::Error;

/// Everything that can stop an Agora process from serving.
///
/// Datastore unavailability is not here: the supervisor retries it forever.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] agora_config::ConfigError),

    /// The interface schema could not be loaded.
    #[error(transparent)]
    Schema(#[from] agora_core::SchemaError),

    /// Logging could not be initialized.
    #[error(transparent)]
    Telemetry(#[from] agora_telemetry::TelemetryError),

    /// The datastore URI is unusable.
    #[error(transparent)]
    Datastore(#[from] agora_server::DatastoreError),

    /// The listener could not bind or serve.
    #[error(transparent)]
    Server(#[from] agora_server::ServerError),
}
