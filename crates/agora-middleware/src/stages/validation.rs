//! Schema validation.
//!
//! Matches the request against the interface schema, coerces its parameters
//! and writes the coerced values back. On success the context carries the
//! operation id and a [`MatchedOperation`]; on failure the stage fails with
//! `NoSuchRoute` (404), `MethodNotAllowed` (405 with an `Allow` header, when
//! enabled), `MalformedPath` (400) or `Validation` (400 listing every
//! offending field).

use agora_core::validator::{validate, ValidationFailure, ValidatorOptions};
use agora_core::{ApiRequest, BoxFuture, InterfaceSchema, Operation, Params, RequestContext};
use http::{header, HeaderValue, Method, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;

use crate::step::{Phase, Stage, Step};
use crate::types::Response;

/// The operation a request was matched to.
#[derive(Debug, Clone)]
pub struct MatchedOperation(pub Arc<Operation>);

impl std::ops::Deref for MatchedOperation {
    type Target = Operation;

    fn deref(&self) -> &Operation {
        &self.0
    }
}

/// Declared header parameters after coercion, keyed by lowercase name.
#[derive(Debug, Clone, Default)]
pub struct HeaderParams(pub Params);

/// Methods declared for a path that was requested with another one.
#[derive(Debug, Clone)]
struct AllowedMethods(Vec<Method>);

/// The validation stage.
#[derive(Debug, Clone)]
pub struct ValidationStage {
    schema: Arc<InterfaceSchema>,
    operations: HashMap<String, Arc<Operation>>,
    options: ValidatorOptions,
}

impl ValidationStage {
    /// Creates a validation stage over a loaded schema.
    #[must_use]
    pub fn new(schema: Arc<InterfaceSchema>, options: ValidatorOptions) -> Self {
        let operations = schema
            .operations()
            .iter()
            .map(|op| (op.operation_id().to_string(), Arc::new(op.clone())))
            .collect();
        Self {
            schema,
            operations,
            options,
        }
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &InterfaceSchema {
        &self.schema
    }
}

impl Stage for ValidationStage {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn phase(&self) -> Phase {
        Phase::Validation
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: &'a mut ApiRequest,
    ) -> BoxFuture<'a, Step> {
        Box::pin(async move {
            let validated = match validate(&self.schema, request, self.options) {
                Ok(validated) => validated,
                Err(failure) => {
                    if let ValidationFailure::MethodNotAllowed { allowed } = &failure {
                        ctx.insert(AllowedMethods(allowed.clone()));
                    }
                    return Step::Fail(failure.into_error(&request.method, &request.path));
                }
            };

            let headers = validated.headers.clone();
            let operation = validated.apply(request);
            let operation_id = operation.operation_id();
            ctx.set_operation_id(operation_id);
            if let Some(op) = self.operations.get(operation_id) {
                ctx.insert(MatchedOperation(Arc::clone(op)));
            }
            ctx.insert(HeaderParams(headers));

            tracing::debug!(
                request_id = %ctx.request_id(),
                operation_id,
                "request validated"
            );
            Step::Continue
        })
    }

    fn after<'a>(
        &'a self,
        ctx: &'a RequestContext,
        _request: &'a ApiRequest,
        response: &'a mut Response,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if response.status() != StatusCode::METHOD_NOT_ALLOWED {
                return;
            }
            let Some(AllowedMethods(allowed)) = ctx.get::<AllowedMethods>() else {
                return;
            };
            let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        })
    }
}
