//! Error types for Agora.
//!
//! [`AgoraError`] is the single error type that stages and handlers raise.
//! Its variant is the kind tag the error classifier dispatches on, so the
//! variants mirror the classifier tiers:
//!
//! | Variant | Raised by | Typical status |
//! |---|---|---|
//! | `Application` | application code, with a recognized [`AppErrorKind`] | from the kind |
//! | `Domain` | business rules about the real world (`SLOT_ALREADY_BOOKED`) | 4xx, default 422 |
//! | `Business` | any other application-logic failure | declared, default 500 |
//! | `Internal` | infrastructure or unexpected failures | 500 |
//! | `Protocol` | the pipeline itself (routing, parsing, validation) | from [`ProtocolKind`] |
//!
//! Stages never render errors themselves; they hand them to the classifier.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result type alias using [`AgoraError`].
pub type AgoraResult<T> = Result<T, AgoraError>;

/// Kinds of application-owned errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppErrorKind {
    /// Input rejected by application logic (not by the schema).
    Validation,
    /// Missing or invalid credentials.
    Unauthorized,
    /// Caller is known but not permitted.
    Forbidden,
    /// Resource does not exist.
    NotFound,
    /// Concurrent modification or duplicate resource.
    Conflict,
    /// Caller exceeded a rate limit.
    RateLimited,
    /// A dependency is temporarily unavailable.
    Unavailable,
}

impl AppErrorKind {
    /// Returns the HTTP status code for this kind.
    #[must_use]
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns the machine-readable code for this kind.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Unavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for AppErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Kinds of protocol-level errors produced by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// No schema entry matches the method and path.
    NoSuchRoute,
    /// The path exists but not for this method.
    MethodNotAllowed,
    /// Parameters or body do not conform to the schema.
    Validation,
    /// The body could not be parsed for its declared content type.
    MalformedBody,
    /// A path segment does not percent-decode to UTF-8.
    MalformedPath,
    /// The body exceeds the configured limit.
    PayloadTooLarge,
    /// The body did not arrive within the read timeout.
    RequestTimeout,
    /// The operation is declared but has no handler.
    NotImplemented,
}

impl ProtocolKind {
    /// Returns the HTTP status code for this kind.
    #[must_use]
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::NoSuchRoute => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Validation | Self::MalformedBody | Self::MalformedPath => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }

    /// Returns the machine-readable code for this kind.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NoSuchRoute => "ROUTE_NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::Validation => "VALIDATION_FAILED",
            Self::MalformedBody => "MALFORMED_BODY",
            Self::MalformedPath => "MALFORMED_PATH",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::NotImplemented => "NOT_IMPLEMENTED",
        }
    }
}

/// Coarse tag naming which variant an [`AgoraError`] is.
///
/// Used for log fields and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorTag {
    /// [`AgoraError::Application`]
    Application,
    /// [`AgoraError::Domain`]
    Domain,
    /// [`AgoraError::Business`]
    Business,
    /// [`AgoraError::Internal`]
    Internal,
    /// [`AgoraError::Protocol`]
    Protocol,
}

impl ErrorTag {
    /// Returns the tag as a lowercase string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Domain => "domain",
            Self::Business => "business",
            Self::Internal => "internal",
            Self::Protocol => "protocol",
        }
    }
}

/// Standard error type for Agora.
///
/// # Example
///
/// ```
/// use agora_core::AgoraError;
/// use http::StatusCode;
///
/// let err = AgoraError::domain_not_found("Item", "42");
/// assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
/// assert_eq!(err.code(), "NOT_FOUND");
/// ```
#[derive(Error, Debug)]
pub enum AgoraError {
    /// Error raised by application code with a recognized kind.
    #[error("{kind}: {message}")]
    Application {
        /// The declared kind.
        kind: AppErrorKind,
        /// Human-readable message.
        message: String,
        /// Optional structured detail.
        detail: Option<Value>,
    },

    /// A violated real-world business rule.
    #[error("rule {rule} violated: {message}")]
    Domain {
        /// Name of the violated rule, used as the response code.
        rule: String,
        /// Status to respond with (4xx).
        status: StatusCode,
        /// Human-readable message.
        message: String,
        /// Optional structured detail.
        detail: Option<Value>,
    },

    /// Generic application-logic failure.
    #[error("business error: {message}")]
    Business {
        /// Status to respond with.
        status: StatusCode,
        /// Message shown to the caller.
        message: String,
        /// Underlying cause, logged but never sent to the caller.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Unexpected or infrastructure failure.
    #[error("internal error: {message}")]
    Internal {
        /// Message for the server log only.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Protocol-level failure detected by the pipeline.
    #[error("{message}")]
    Protocol {
        /// The protocol error kind.
        kind: ProtocolKind,
        /// Human-readable message.
        message: String,
        /// Offending fields, for validation failures.
        fields: Option<FieldErrors>,
    },
}

impl AgoraError {
    /// Creates an application-owned error.
    #[must_use]
    pub fn application(kind: AppErrorKind, message: impl Into<String>) -> Self {
        Self::Application {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    /// Creates an application-owned validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::application(AppErrorKind::Validation, message)
    }

    /// Creates an application-owned unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::application(AppErrorKind::Unauthorized, message)
    }

    /// Creates an application-owned forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::application(AppErrorKind::Forbidden, message)
    }

    /// Creates an application-owned not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::application(AppErrorKind::NotFound, message)
    }

    /// Creates an application-owned conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::application(AppErrorKind::Conflict, message)
    }

    /// Creates a business-rule violation with the default status (422).
    ///
    /// The rule name becomes the response `code`.
    #[must_use]
    pub fn domain(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Domain {
            rule: rule.into(),
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
            detail: None,
        }
    }

    /// Creates the `NOT_FOUND` business rule for a missing resource.
    #[must_use]
    pub fn domain_not_found(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        let resource_type = resource_type.into();
        let resource_id = resource_id.into();
        Self::Domain {
            rule: "NOT_FOUND".to_string(),
            status: StatusCode::NOT_FOUND,
            message: format!("{resource_type} with ID '{resource_id}' not found"),
            detail: Some(serde_json::json!({
                "resource_type": resource_type,
                "resource_id": resource_id,
            })),
        }
    }

    /// Creates a generic business error (500).
    #[must_use]
    pub fn business(message: impl Into<String>) -> Self {
        Self::Business {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a generic business error with a source.
    pub fn business_with_source(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Business {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a source.
    pub fn internal_with_source(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a protocol error.
    #[must_use]
    pub fn protocol(kind: ProtocolKind, message: impl Into<String>) -> Self {
        Self::Protocol {
            kind,
            message: message.into(),
            fields: None,
        }
    }

    /// Creates the "no such route" protocol error.
    #[must_use]
    pub fn no_such_route(method: &http::Method, path: &str) -> Self {
        Self::protocol(
            ProtocolKind::NoSuchRoute,
            format!("No route matches {method} {path}"),
        )
    }

    /// Creates a schema validation failure listing the offending fields.
    #[must_use]
    pub fn invalid_request(fields: FieldErrors) -> Self {
        let message = match fields.len() {
            1 => "Request parameter failed validation".to_string(),
            n => format!("{n} request parameters failed validation"),
        };
        Self::Protocol {
            kind: ProtocolKind::Validation,
            message,
            fields: Some(fields),
        }
    }

    /// Creates a malformed body protocol error.
    #[must_use]
    pub fn malformed_body(message: impl Into<String>) -> Self {
        Self::protocol(ProtocolKind::MalformedBody, message)
    }

    /// Creates the error for a path that does not decode.
    #[must_use]
    pub fn malformed_path(path: &str) -> Self {
        Self::protocol(
            ProtocolKind::MalformedPath,
            format!("Path '{path}' is not valid percent-encoded UTF-8"),
        )
    }

    /// Creates a payload too large protocol error.
    #[must_use]
    pub fn payload_too_large(limit: usize) -> Self {
        Self::protocol(
            ProtocolKind::PayloadTooLarge,
            format!("Request body exceeds {limit} bytes"),
        )
    }

    /// Creates a body read timeout protocol error.
    #[must_use]
    pub fn request_timeout(timeout: std::time::Duration) -> Self {
        Self::protocol(
            ProtocolKind::RequestTimeout,
            format!("Request body not received within {}s", timeout.as_secs()),
        )
    }

    /// Creates a not implemented protocol error.
    #[must_use]
    pub fn not_implemented(operation_id: &str) -> Self {
        Self::protocol(
            ProtocolKind::NotImplemented,
            format!("Operation '{operation_id}' has no handler"),
        )
    }

    /// Overrides the status of a `Domain` or `Business` error.
    ///
    /// Other variants derive their status from their kind and are unchanged.
    #[must_use]
    pub fn with_status(mut self, new_status: StatusCode) -> Self {
        match &mut self {
            Self::Domain { status, .. } | Self::Business { status, .. } => *status = new_status,
            _ => {}
        }
        self
    }

    /// Attaches structured detail to an `Application` or `Domain` error.
    #[must_use]
    pub fn with_detail(mut self, value: Value) -> Self {
        match &mut self {
            Self::Application { detail, .. } | Self::Domain { detail, .. } => *detail = Some(value),
            _ => {}
        }
        self
    }

    /// Returns the variant tag.
    #[must_use]
    pub const fn tag(&self) -> ErrorTag {
        match self {
            Self::Application { .. } => ErrorTag::Application,
            Self::Domain { .. } => ErrorTag::Domain,
            Self::Business { .. } => ErrorTag::Business,
            Self::Internal { .. } => ErrorTag::Internal,
            Self::Protocol { .. } => ErrorTag::Protocol,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Application { kind, .. } => kind.status_code(),
            Self::Domain { status, .. } | Self::Business { status, .. } => *status,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Protocol { kind, .. } => kind.status_code(),
        }
    }

    /// Returns the machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Application { kind, .. } => kind.code(),
            Self::Domain { rule, .. } => rule,
            Self::Business { .. } => "BUSINESS_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
            Self::Protocol { kind, .. } => kind.code(),
        }
    }

    /// Returns the caller-facing message for this error.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Application { message, .. }
            | Self::Domain { message, .. }
            | Self::Business { message, .. }
            | Self::Internal { message, .. }
            | Self::Protocol { message, .. } => message,
        }
    }
}

impl From<anyhow::Error> for AgoraError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

/// Why a field failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldReason {
    /// A required field is absent.
    MissingRequired,
    /// The value cannot be read as the declared type.
    WrongType,
    /// The value violates a declared constraint.
    Constraint,
}

/// One offending field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Parameter name or JSON path.
    pub field: String,
    /// Where the field was looked up (`path`, `query`, `header`, `body`).
    #[serde(rename = "in")]
    pub location: String,
    /// Why it failed.
    pub reason: FieldReason,
    /// Human-readable explanation.
    pub message: String,
}

/// Field-level validation errors, in the order they were found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldErrors {
    /// The offending fields.
    pub fields: Vec<FieldError>,
}

impl FieldErrors {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an offending field.
    pub fn add(
        &mut self,
        field: impl Into<String>,
        location: impl Into<String>,
        reason: FieldReason,
        message: impl Into<String>,
    ) {
        self.fields.push(FieldError {
            field: field.into(),
            location: location.into(),
            reason,
            message: message.into(),
        });
    }

    /// Returns `true` if nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the number of offending fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns the first error recorded for `field`, if any.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldError> {
        self.fields.iter().find(|f| f.field == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_error_status_from_kind() {
        let error = AgoraError::not_found("Nothing here");
        assert_eq!(error.tag(), ErrorTag::Application);
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(error.code(), "NOT_FOUND");
        assert_eq!(error.message(), "Nothing here");
    }

    #[test]
    fn test_domain_rule_is_code() {
        let error = AgoraError::domain("SLOT_ALREADY_BOOKED", "That slot is taken");
        assert_eq!(error.tag(), ErrorTag::Domain);
        assert_eq!(error.code(), "SLOT_ALREADY_BOOKED");
        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let error = error.with_status(StatusCode::CONFLICT);
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_domain_not_found_carries_resource() {
        let error = AgoraError::domain_not_found("Item", "42");
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
        assert!(error.message().contains("42"));
        match error {
            AgoraError::Domain { detail: Some(detail), .. } => {
                assert_eq!(detail["resource_type"], "Item");
                assert_eq!(detail["resource_id"], "42");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_with_status_ignores_kinded_variants() {
        let error = AgoraError::forbidden("no").with_status(StatusCode::IM_A_TEAPOT);
        assert_eq!(error.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_internal_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let error = AgoraError::internal_with_source("query failed", io);
        assert_eq!(error.code(), "INTERNAL_ERROR");
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_from_anyhow_is_internal() {
        let error: AgoraError = anyhow::anyhow!("socket closed").into();
        assert_eq!(error.tag(), ErrorTag::Internal);
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_invalid_request_message_counts_fields() {
        let mut fields = FieldErrors::new();
        fields.add("id", "path", FieldReason::WrongType, "expected integer");
        fields.add("limit", "query", FieldReason::MissingRequired, "required");

        let error = AgoraError::invalid_request(fields);
        assert_eq!(error.code(), "VALIDATION_FAILED");
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert!(error.message().starts_with('2'));
    }

    #[test]
    fn test_protocol_kinds_map_to_error_statuses() {
        let kinds = [
            ProtocolKind::NoSuchRoute,
            ProtocolKind::MethodNotAllowed,
            ProtocolKind::Validation,
            ProtocolKind::MalformedBody,
            ProtocolKind::MalformedPath,
            ProtocolKind::PayloadTooLarge,
            ProtocolKind::RequestTimeout,
            ProtocolKind::NotImplemented,
        ];
        for kind in kinds {
            let status = kind.status_code();
            assert!(
                status.is_client_error() || status.is_server_error(),
                "{kind:?} should map to an error status, got {status}"
            );
        }
        assert_ne!(
            ProtocolKind::NoSuchRoute.status_code(),
            ProtocolKind::Validation.status_code()
        );
    }

    #[test]
    fn test_field_error_serializes_location_as_in() {
        let mut fields = FieldErrors::new();
        fields.add("id", "path", FieldReason::WrongType, "expected integer");
        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(json["fields"][0]["in"], "path");
        assert_eq!(json["fields"][0]["reason"], "wrong_type");
    }
}
