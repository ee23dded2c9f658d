//! # Agora
//!
//! **Schema-driven HTTP API server with a datastore-gated boot.**
//!
//! An Agora process waits for its datastore before doing anything else, then
//! serves the operations declared in an interface schema through a fixed
//! middleware chain:
//!
//! ```text
//! Request → CORS → Compression → Session → Locals → Static → Parse
//!         → Validation → Gatekeepers → Handler
//!                                         ↓
//! Response ← request id ← Error classifier ┘
//! ```
//!
//! Failures from any stage land in the three-tier error classifier:
//! protocol errors, business rules, and everything else.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agora::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new()
//!         .with_dotenv()?
//!         .with_optional_file("agora.toml")?
//!         .load()?;
//!     agora::telemetry::init_telemetry(&config.telemetry)?;
//!
//!     let handlers = HandlerRegistry::new().with("ping", |_ctx, _req| async {
//!         Ok(Reply::ok(serde_json::json!("pong")))
//!     });
//!
//!     App::new(config).handlers(handlers).run().await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/agora/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod app;
pub mod error;

pub use agora_cache as cache;
pub use agora_config as config;
pub use agora_core as core;
pub use agora_middleware as middleware;
pub use agora_server as server;
pub use agora_telemetry as telemetry;

pub use app::{pipeline_builder, App};
pub use error::AppError;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use agora::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{App, AppError};

    pub use agora_cache::{CacheConfig, EphemeralCache};
    pub use agora_config::{AgoraConfig, ConfigLoader};
    pub use agora_core::{
        AgoraError, AgoraResult, ApiRequest, HandlerRegistry, InterfaceSchema, Reply,
        RequestContext,
    };
    pub use agora_middleware::stages::{
        BearerTokenGate, FnGate, Gatekeeper, Locals, Principal, Session, TokenVerifier,
    };
    pub use agora_middleware::{Pipeline, Response};
}
