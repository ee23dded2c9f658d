//! Built-in pipeline stages.
//!
//! Listed in execution order:
//!
//! 1. [`cors`] - preflight answers and cross-origin response headers
//! 2. [`compression`] - negotiated response compression
//! 3. [`session`] - cookie-keyed server-side sessions
//! 4. [`locals`] - environment, shared locals and the ephemeral cache
//! 5. [`static_files`] - files from a public directory, and [`docs`] for the
//!    schema document
//! 6. [`parse`] - query string and body parsing
//! 7. [`validation`] - schema matching and parameter coercion
//! 8. [`gatekeeper`] - user-supplied admission checks

pub mod compression;
pub mod cors;
pub mod docs;
pub mod gatekeeper;
pub mod locals;
pub mod parse;
pub mod session;
pub mod static_files;
pub mod validation;

pub use compression::{Algorithm, CompressionLevel, CompressionStage};
pub use cors::{AllowedOrigins, CorsBuilder, CorsConfig, CorsStage};
pub use docs::{SchemaDocsStage, DEFAULT_DOCS_PATH};
pub use gatekeeper::{BearerTokenGate, FnGate, Gatekeeper, GatekeeperStage, Principal, TokenVerifier};
pub use locals::{Environment, Locals, LocalsStage};
pub use parse::ParseStage;
pub use session::{
    MemorySessionStore, Session, SessionConfig, SessionData, SessionError, SessionStage, SessionStore,
};
pub use static_files::StaticFilesStage;
pub use validation::{HeaderParams, MatchedOperation, ValidationStage};
