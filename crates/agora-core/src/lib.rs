//! # Agora Core
//!
//! Core types for the Agora request pipeline.
//!
//! This crate provides the foundational types used throughout Agora:
//!
//! - [`InterfaceSchema`] - Declarative description of every accepted route
//! - [`validate`] - Structural validation and coercion against the schema
//! - [`AgoraError`] - Kind-tagged error consumed by the error classifier
//! - [`RequestContext`] - Per-request context bag with typed extensions
//! - [`ApiRequest`] - The parsed inbound request
//! - [`Handler`] / [`HandlerRegistry`] - Business handlers keyed by operation id
//! - [`envelope`] - The `{ success, data | error }` response envelope

#![doc(html_root_url = "https://docs.rs/agora-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
pub mod envelope;
mod error;
mod handler;
mod request;
pub mod schema;
pub mod validator;

pub use context::{RequestContext, RequestId};
pub use envelope::{Envelope, ErrorBody};
pub use error::{
    AgoraError, AgoraResult, AppErrorKind, ErrorTag, FieldError, FieldErrors, FieldReason,
    ProtocolKind,
};
pub use handler::{BoxFuture, Handler, HandlerFuture, HandlerRegistry, Reply};
pub use request::{decode_path_segments, ApiRequest, Params};
pub use schema::{InterfaceSchema, Operation, ParamLocation, ParamSpec, ParamType, Schema, SchemaError};
pub use validator::{validate, ValidatedRequest, ValidationFailure, ValidatorOptions};
