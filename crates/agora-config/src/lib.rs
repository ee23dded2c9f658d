//! Typed configuration for Agora.
//!
//! - TOML and JSON configuration files
//! - Strict parsing (unknown fields are errors)
//! - `.env` loading outside production
//! - Prefixed environment overrides (`AGORA__SECTION__KEY`)
//! - The conventional `PORT` and datastore URI variables
//!
//! # Example
//!
//! ```no_run
//! use agora_config::ConfigLoader;
//!
//! # fn main() -> Result<(), agora_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("agora.toml")?
//!     .with_dotenv()?
//!     .with_env_prefix("AGORA")
//!     .load()?;
//!
//! println!("listening on {}", config.server.socket_addr()?);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! temp_dir = "temp"
//!
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//! body_timeout_secs = 30
//! max_body_bytes = 1048576
//!
//! [datastore]
//! uri = "mongodb://localhost:27017/agora"
//! retry_delay_secs = 5
//!
//! [session]
//! cookie_name = "JSESSION"
//! secure = true
//!
//! [static_files]
//! dir = "public"
//!
//! [cors]
//! allowed_origins = ["https://shop.example"]
//!
//! [schema]
//! path = "interface.json"
//!
//! [telemetry]
//! service_name = "items-api"
//! environment = "production"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//! ```

#![doc(html_root_url = "https://docs.rs/agora-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{AgoraConfig, AgoraConfigBuilder, MAX_TTL_SECS};
pub use error::ConfigError;
pub use loader::{ConfigLoader, DATASTORE_URI_VARS, DEFAULT_ENV_PREFIX, ENVIRONMENT_VARS};
pub use schema::*;

pub use agora_telemetry::{LogConfig, LogFormat, TelemetryConfig};
