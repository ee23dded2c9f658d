//! Four-tier error classification.
//!
//! Every failure that leaves the pipeline, whether a stage returned
//! [`Step::Fail`](crate::Step::Fail) or a handler returned `Err`, is shaped
//! here. Tiers are tried in order and the first one that claims the error
//! shapes it:
//!
//! | # | Tier | Claims | Severity |
//! |---|------|--------|----------|
//! | 1 | application | `AgoraError::Application` | info |
//! | 2 | domain | `AgoraError::Domain` | info |
//! | 3 | business | `AgoraError::Business`, `AgoraError::Internal` | warn |
//! | 4 | protocol | `AgoraError::Protocol` | info |
//!
//! An error no tier claims falls to the catch-all: 500 `INTERNAL_ERROR`,
//! logged at `error`. Whatever the tier, the body has the same shape:
//! `{ "success": false, "error": { "code", "message", "detail"? } }`.

use agora_core::envelope::failure_body;
use agora_core::{AgoraError, ErrorBody, ProtocolKind, RequestContext};
use agora_telemetry::metrics::record_error;
use http::StatusCode;
use serde_json::json;

use crate::step::StageFailure;
use crate::types::{Response, ResponseExt};

/// Message sent for errors whose details must stay server-side.
pub const GENERIC_INTERNAL_MESSAGE: &str = "An internal error occurred";

/// Log level for a classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Expected client-side failure.
    Info,
    /// Application failure worth attention.
    Warn,
    /// Unclassified failure.
    Error,
}

/// A shaped error ready to be rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// The `error` member of the envelope.
    pub body: ErrorBody,
    /// Name of the tier that shaped it, or `catch_all`.
    pub tier: &'static str,
    /// Level it was logged at.
    pub severity: Severity,
}

impl ErrorResponse {
    /// Renders the failure envelope as an HTTP response.
    #[must_use]
    pub fn into_response(self) -> Response {
        Response::json_bytes(self.status, failure_body(self.body))
    }
}

/// One classification tier.
pub trait Tier: Send + Sync + 'static {
    /// Tier name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Returns `true` if this tier handles the error.
    fn claims(&self, error: &AgoraError) -> bool;

    /// Shapes a claimed error into a status and error body.
    fn shape(&self, error: &AgoraError) -> (StatusCode, ErrorBody);

    /// Level claimed errors are logged at.
    fn severity(&self, error: &AgoraError) -> Severity;
}

/// Tier 1: errors raised by application code with a recognized kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplicationTier;

impl Tier for ApplicationTier {
    fn name(&self) -> &'static str {
        "application"
    }

    fn claims(&self, error: &AgoraError) -> bool {
        matches!(error, AgoraError::Application { .. })
    }

    fn shape(&self, error: &AgoraError) -> (StatusCode, ErrorBody) {
        let detail = match error {
            AgoraError::Application { detail, .. } => detail.clone(),
            _ => None,
        };
        (
            error.status_code(),
            ErrorBody::new(error.code(), error.message()).with_detail(detail),
        )
    }

    fn severity(&self, _error: &AgoraError) -> Severity {
        Severity::Info
    }
}

/// Tier 2: violated business rules; the rule name is the code.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainTier;

impl Tier for DomainTier {
    fn name(&self) -> &'static str {
        "domain"
    }

    fn claims(&self, error: &AgoraError) -> bool {
        matches!(error, AgoraError::Domain { .. })
    }

    fn shape(&self, error: &AgoraError) -> (StatusCode, ErrorBody) {
        let detail = match error {
            AgoraError::Domain { detail, .. } => detail.clone(),
            _ => None,
        };
        (
            error.status_code(),
            ErrorBody::new(error.code(), error.message()).with_detail(detail),
        )
    }

    fn severity(&self, _error: &AgoraError) -> Severity {
        Severity::Info
    }
}

/// Tier 3: generic application failures and infrastructure errors.
///
/// Internal errors are answered with a generic message; their message and
/// source chain only reach the server log.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusinessTier;

impl Tier for BusinessTier {
    fn name(&self) -> &'static str {
        "business"
    }

    fn claims(&self, error: &AgoraError) -> bool {
        matches!(
            error,
            AgoraError::Business { .. } | AgoraError::Internal { .. }
        )
    }

    fn shape(&self, error: &AgoraError) -> (StatusCode, ErrorBody) {
        match error {
            AgoraError::Internal { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::new(error.code(), GENERIC_INTERNAL_MESSAGE),
            ),
            _ => (
                error.status_code(),
                ErrorBody::new(error.code(), error.message()),
            ),
        }
    }

    fn severity(&self, _error: &AgoraError) -> Severity {
        Severity::Warn
    }
}

/// Tier 4: protocol violations, mapped straight to their HTTP status.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolTier;

impl Tier for ProtocolTier {
    fn name(&self) -> &'static str {
        "protocol"
    }

    fn claims(&self, error: &AgoraError) -> bool {
        matches!(error, AgoraError::Protocol { .. })
    }

    fn shape(&self, error: &AgoraError) -> (StatusCode, ErrorBody) {
        let detail = match error {
            AgoraError::Protocol {
                kind: ProtocolKind::Validation,
                fields: Some(fields),
                ..
            } => Some(json!({ "fields": fields.fields })),
            _ => None,
        };
        (
            error.status_code(),
            ErrorBody::new(error.code(), error.message()).with_detail(detail),
        )
    }

    fn severity(&self, _error: &AgoraError) -> Severity {
        Severity::Info
    }
}

/// Ordered tier dispatch with a catch-all.
pub struct ErrorClassifier {
    tiers: Vec<Box<dyn Tier>>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorClassifier")
            .field("tiers", &self.tier_names())
            .finish()
    }
}

impl ErrorClassifier {
    /// Creates a classifier with the four default tiers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tiers(vec![
            Box::new(ApplicationTier),
            Box::new(DomainTier),
            Box::new(BusinessTier),
            Box::new(ProtocolTier),
        ])
    }

    /// Creates a classifier with a custom tier list, tried in order.
    #[must_use]
    pub fn with_tiers(tiers: Vec<Box<dyn Tier>>) -> Self {
        Self { tiers }
    }

    /// Returns the tier names in dispatch order.
    #[must_use]
    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    /// Shapes a failure and logs it once.
    pub fn classify(&self, failure: &StageFailure, ctx: &RequestContext) -> ErrorResponse {
        let error = failure.error();
        let response = self.shape(error);
        log_classified(failure, ctx, &response);
        record_error(response.tier, &response.body.code);
        response
    }

    /// Shapes an error without logging it.
    #[must_use]
    pub fn shape(&self, error: &AgoraError) -> ErrorResponse {
        match self.tiers.iter().find(|tier| tier.claims(error)) {
            Some(tier) => {
                let (status, body) = tier.shape(error);
                ErrorResponse {
                    status,
                    body,
                    tier: tier.name(),
                    severity: tier.severity(error),
                }
            }
            None => ErrorResponse {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: ErrorBody::new("INTERNAL_ERROR", GENERIC_INTERNAL_MESSAGE),
                tier: "catch_all",
                severity: Severity::Error,
            },
        }
    }
}

fn log_classified(failure: &StageFailure, ctx: &RequestContext, response: &ErrorResponse) {
    let error = failure.error();
    let request_id = ctx.request_id();
    let operation_id = ctx.operation_id().unwrap_or("-");
    let status = response.status.as_u16();
    let code = response.body.code.as_str();
    let tier = response.tier;
    let stage = failure.stage();

    match response.severity {
        Severity::Info => tracing::info!(
            %request_id, operation_id, stage, tier, code, http.status_code = status,
            error = %error, "request failed"
        ),
        Severity::Warn => tracing::warn!(
            %request_id, operation_id, stage, tier, code, http.status_code = status,
            error = %error, chain = %error_chain(error), "request failed"
        ),
        Severity::Error => tracing::error!(
            %request_id, operation_id, stage, tier, code, http.status_code = status,
            error = %error, chain = %error_chain(error), "unclassified error"
        ),
    }
}

/// Renders an error and its sources as `outer: inner: root`.
fn error_chain(error: &AgoraError) -> String {
    let mut chain = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{FieldErrors, FieldReason};

    fn shape(error: AgoraError) -> ErrorResponse {
        ErrorClassifier::new().shape(&error)
    }

    #[test]
    fn test_default_tier_order() {
        assert_eq!(
            ErrorClassifier::new().tier_names(),
            vec!["application", "domain", "business", "protocol"]
        );
    }

    #[test]
    fn test_application_tier() {
        let shaped = shape(AgoraError::not_found("Item not found"));
        assert_eq!(shaped.tier, "application");
        assert_eq!(shaped.status, StatusCode::NOT_FOUND);
        assert_eq!(shaped.body.code, "NOT_FOUND");
        assert_eq!(shaped.body.message, "Item not found");
        assert_eq!(shaped.severity, Severity::Info);
    }

    #[test]
    fn test_domain_tier_uses_rule_name() {
        let shaped = shape(
            AgoraError::domain("SLOT_ALREADY_BOOKED", "Slot is taken")
                .with_detail(json!({ "slot": 3 })),
        );
        assert_eq!(shaped.tier, "domain");
        assert_eq!(shaped.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(shaped.body.code, "SLOT_ALREADY_BOOKED");
        assert_eq!(shaped.body.detail, Some(json!({ "slot": 3 })));
    }

    #[test]
    fn test_domain_not_found() {
        let shaped = shape(AgoraError::domain_not_found("Item", "42"));
        assert_eq!(shaped.status, StatusCode::NOT_FOUND);
        assert_eq!(shaped.body.code, "NOT_FOUND");
        assert_eq!(shaped.body.message, "Item with ID '42' not found");
    }

    #[test]
    fn test_business_tier_keeps_message() {
        let shaped = shape(
            AgoraError::business("Quota exceeded").with_status(StatusCode::PAYMENT_REQUIRED),
        );
        assert_eq!(shaped.tier, "business");
        assert_eq!(shaped.status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(shaped.body.code, "BUSINESS_ERROR");
        assert_eq!(shaped.body.message, "Quota exceeded");
        assert_eq!(shaped.severity, Severity::Warn);
    }

    #[test]
    fn test_internal_error_hides_details() {
        let source = std::io::Error::new(std::io::ErrorKind::Other, "socket closed by peer");
        let shaped = shape(AgoraError::internal_with_source("db read failed", source));
        assert_eq!(shaped.tier, "business");
        assert_eq!(shaped.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(shaped.body.code, "INTERNAL_ERROR");
        assert_eq!(shaped.body.message, GENERIC_INTERNAL_MESSAGE);
        assert!(shaped.body.detail.is_none());
    }

    #[test]
    fn test_protocol_tier_no_such_route() {
        let shaped = shape(AgoraError::no_such_route(&http::Method::GET, "/nope"));
        assert_eq!(shaped.tier, "protocol");
        assert_eq!(shaped.status, StatusCode::NOT_FOUND);
        assert_eq!(shaped.body.code, "ROUTE_NOT_FOUND");
        assert!(shaped.body.detail.is_none());
    }

    #[test]
    fn test_protocol_tier_lists_fields() {
        let mut fields = FieldErrors::new();
        fields.add("limit", "query", FieldReason::WrongType, "expected integer");
        let shaped = shape(AgoraError::invalid_request(fields));
        assert_eq!(shaped.status, StatusCode::BAD_REQUEST);
        assert_eq!(shaped.body.code, "VALIDATION_FAILED");
        let detail = shaped.body.detail.unwrap();
        assert_eq!(detail["fields"][0]["field"], "limit");
        assert_eq!(detail["fields"][0]["reason"], "wrong_type");
    }

    #[test]
    fn test_catch_all_when_no_tier_claims() {
        let classifier = ErrorClassifier::with_tiers(vec![Box::new(DomainTier)]);
        let shaped = classifier.shape(&AgoraError::forbidden("nope"));
        assert_eq!(shaped.tier, "catch_all");
        assert_eq!(shaped.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(shaped.body.code, "INTERNAL_ERROR");
        assert_eq!(shaped.severity, Severity::Error);
    }

    #[test]
    fn test_first_claiming_tier_wins() {
        struct Everything;
        impl Tier for Everything {
            fn name(&self) -> &'static str {
                "everything"
            }
            fn claims(&self, _error: &AgoraError) -> bool {
                true
            }
            fn shape(&self, _error: &AgoraError) -> (StatusCode, ErrorBody) {
                (StatusCode::IM_A_TEAPOT, ErrorBody::new("TEAPOT", "short and stout"))
            }
            fn severity(&self, _error: &AgoraError) -> Severity {
                Severity::Info
            }
        }

        let classifier = ErrorClassifier::with_tiers(vec![Box::new(Everything), Box::new(DomainTier)]);
        let shaped = classifier.shape(&AgoraError::domain("RULE", "x"));
        assert_eq!(shaped.tier, "everything");
        assert_eq!(shaped.body.code, "TEAPOT");
    }

    #[test]
    fn test_classify_renders_envelope() {
        let failure = StageFailure::from_handler(AgoraError::domain_not_found("Item", "42"));
        let ctx = RequestContext::new();
        let response = ErrorClassifier::new().classify(&failure, &ctx).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let source = anyhow::anyhow!("connection refused").context("query items");
        let chain = error_chain(&AgoraError::internal_with_source("lookup failed", source));
        assert!(chain.starts_with("internal error: lookup failed"));
        assert!(chain.contains("query items"));
    }
}
