//! The request pipeline and its driver.
//!
//! Stages run in phase order:
//!
//! ```text
//! CORS → Compression → Session → Locals → Static → Parse → Validation → Gatekeepers → Handler
//! ```
//!
//! The driver owns the loop. Each stage returns a [`Step`]; the first
//! `Respond` or `Fail` ends the chain, so no stage runs twice and nothing runs
//! after a short-circuit. Every failure, whether raised by a stage or by the
//! handler, goes through the [`ErrorClassifier`]. Stages that were entered then
//! get their `after` hook in reverse order, which is how CORS headers and the
//! session cookie end up on error responses too.

use agora_core::envelope::success_body;
use agora_core::{
    AgoraError, ApiRequest, HandlerRegistry, InterfaceSchema, Reply, RequestContext,
};
use agora_core::validator::ValidatorOptions;
use agora_telemetry::metrics::{record_request, InFlightGuard};
use bytes::Bytes;
use std::sync::Arc;

use crate::classifier::ErrorClassifier;
use crate::request_id::RequestIdPolicy;
use crate::stages::{
    CompressionStage, CorsStage, Gatekeeper, GatekeeperStage, LocalsStage, ParseStage,
    SchemaDocsStage, SessionStage, StaticFilesStage, ValidationStage,
};
use crate::step::{Stage, StageFailure, Step};
use crate::types::{Response, ResponseExt};

/// How the stage chain ended.
enum Outcome {
    /// Every stage continued; the handler runs next.
    Proceed,
    /// A stage answered the request itself.
    Respond(Response),
    /// A stage failed.
    Fail(StageFailure),
}

/// The assembled request pipeline.
///
/// Built once at boot and shared by every connection.
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::builder(schema, handlers)
///     .session(SessionStage::default())
///     .gatekeeper(FnGate::new("open", |_, _| Ok(())))
///     .build();
///
/// let response = pipeline.process(request).await;
/// ```
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    cors: CorsStage,
    handlers: HandlerRegistry,
    classifier: ErrorClassifier,
    request_ids: RequestIdPolicy,
    schema: Arc<InterfaceSchema>,
    mock_unbound: bool,
}

impl Pipeline {
    /// Creates a pipeline builder.
    #[must_use]
    pub fn builder(schema: Arc<InterfaceSchema>, handlers: HandlerRegistry) -> PipelineBuilder {
        PipelineBuilder::new(schema, handlers)
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the interface schema.
    #[must_use]
    pub fn schema(&self) -> &InterfaceSchema {
        &self.schema
    }

    /// Returns the handler registry.
    #[must_use]
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Processes one buffered request into a response.
    ///
    /// Never fails: every error becomes an error envelope.
    pub async fn process(&self, request: http::Request<Bytes>) -> Response {
        let _in_flight = InFlightGuard::new();
        let request_id = self.request_ids.resolve(request.headers());
        let mut ctx = RequestContext::with_request_id(request_id);
        let mut request = ApiRequest::from_http(request);

        let mut entered = 0;
        let outcome = self.run_stages(&mut ctx, &mut request, &mut entered).await;

        let ctx = Arc::new(ctx);
        let request = Arc::new(request);

        let mut response = match outcome {
            Outcome::Respond(response) => response,
            Outcome::Fail(failure) => self.classifier.classify(&failure, &ctx).into_response(),
            Outcome::Proceed => match self.invoke_handler(&ctx, &request).await {
                Ok(response) => response,
                Err(failure) => self.classifier.classify(&failure, &ctx).into_response(),
            },
        };

        for stage in self.stages[..entered].iter().rev() {
            stage.after(&ctx, &request, &mut response).await;
        }

        self.request_ids.stamp(&mut response, request_id);

        let status = response.status().as_u16();
        let elapsed = ctx.elapsed();
        agora_telemetry::log_request_complete!(
            request_id,
            ctx.operation_id(),
            request.method,
            request.path,
            status,
            elapsed.as_secs_f64() * 1000.0
        );
        record_request(ctx.operation_id(), status, elapsed);

        response
    }

    /// Shapes an error raised before the request could enter the pipeline,
    /// such as an oversized or slow body.
    ///
    /// No stage ran, but the response still gets CORS headers so that a
    /// cross-origin caller can read the envelope.
    pub fn reject(&self, headers: &http::HeaderMap, origin: &'static str, error: AgoraError) -> Response {
        let request_id = self.request_ids.resolve(headers);
        let ctx = RequestContext::with_request_id(request_id);
        let failure = StageFailure::new(origin, error);
        let mut response = self.classifier.classify(&failure, &ctx).into_response();
        self.cors.decorate(headers, &mut response);
        self.request_ids.stamp(&mut response, request_id);
        response
    }

    async fn run_stages(
        &self,
        ctx: &mut RequestContext,
        request: &mut ApiRequest,
        entered: &mut usize,
    ) -> Outcome {
        for stage in &self.stages {
            *entered += 1;
            match stage.handle(ctx, request).await {
                Step::Continue => {}
                Step::Respond(response) => {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        stage = stage.name(),
                        status = response.status().as_u16(),
                        "stage responded"
                    );
                    return Outcome::Respond(response);
                }
                Step::Fail(error) => return Outcome::Fail(StageFailure::new(stage.name(), error)),
            }
        }
        Outcome::Proceed
    }

    async fn invoke_handler(
        &self,
        ctx: &Arc<RequestContext>,
        request: &Arc<ApiRequest>,
    ) -> Result<Response, StageFailure> {
        let Some(operation_id) = ctx.operation_id() else {
            return Err(StageFailure::from_handler(AgoraError::no_such_route(
                &request.method,
                &request.path,
            )));
        };
        let Some(handler) = self.handlers.get(operation_id) else {
            return self.mock(operation_id);
        };

        // Spawned so that a panicking handler becomes a 500 instead of
        // tearing down the connection task.
        let task = tokio::spawn(handler.call(Arc::clone(ctx), Arc::clone(request)));
        let reply = match task.await {
            Ok(result) => result.map_err(StageFailure::from_handler)?,
            Err(join_error) => {
                return Err(StageFailure::from_handler(AgoraError::internal(format!(
                    "handler for '{operation_id}' did not complete: {join_error}"
                ))));
            }
        };
        render_reply(reply).map_err(StageFailure::from_handler)
    }

    /// Answers an operation that has no handler from its declared examples,
    /// when mocking is on.
    fn mock(&self, operation_id: &str) -> Result<Response, StageFailure> {
        let mocked = self
            .schema
            .get_operation(operation_id)
            .filter(|_| self.mock_unbound)
            .and_then(|operation| operation.mock_response());
        let Some((status, data)) = mocked else {
            return Err(StageFailure::from_handler(AgoraError::not_implemented(operation_id)));
        };
        tracing::debug!(operation_id, status, "answering unbound operation from its example");

        let status = http::StatusCode::from_u16(status).map_err(|e| {
            StageFailure::from_handler(AgoraError::internal(format!(
                "example status for '{operation_id}': {e}"
            )))
        })?;
        render_reply(Reply::ok(data).with_status(status)).map_err(StageFailure::from_handler)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

fn render_reply(reply: Reply) -> Result<Response, AgoraError> {
    let status = reply.status();
    let body = success_body(&reply.into_data())
        .map_err(|e| AgoraError::internal_with_source("failed to serialize response", e))?;
    Ok(Response::json_bytes(status, body))
}

/// Builder for a [`Pipeline`].
///
/// CORS, parsing and validation are always present. The other built-in stages
/// are opt-in. Stages are sorted by phase at [`build`](Self::build), so the
/// order of builder calls does not matter except among gatekeepers.
pub struct PipelineBuilder {
    schema: Arc<InterfaceSchema>,
    handlers: HandlerRegistry,
    cors: CorsStage,
    parse: ParseStage,
    validator_options: ValidatorOptions,
    stages: Vec<Box<dyn Stage>>,
    classifier: ErrorClassifier,
    request_ids: RequestIdPolicy,
    mock_unbound: bool,
}

impl PipelineBuilder {
    /// Creates a builder with default CORS, parsing and validation.
    #[must_use]
    pub fn new(schema: Arc<InterfaceSchema>, handlers: HandlerRegistry) -> Self {
        Self {
            schema,
            handlers,
            cors: CorsStage::builder().build(),
            parse: ParseStage::default(),
            validator_options: ValidatorOptions::default(),
            stages: Vec::new(),
            classifier: ErrorClassifier::default(),
            request_ids: RequestIdPolicy::default(),
            mock_unbound: false,
        }
    }

    /// Replaces the CORS stage.
    #[must_use]
    pub fn cors(mut self, cors: CorsStage) -> Self {
        self.cors = cors;
        self
    }

    /// Enables response compression.
    #[must_use]
    pub fn compression(self, compression: CompressionStage) -> Self {
        self.stage(compression)
    }

    /// Enables cookie sessions.
    #[must_use]
    pub fn session(self, session: SessionStage) -> Self {
        self.stage(session)
    }

    /// Attaches environment, locals and the shared cache to every request.
    #[must_use]
    pub fn locals(self, locals: LocalsStage) -> Self {
        self.stage(locals)
    }

    /// Enables static file serving.
    #[must_use]
    pub fn static_files(self, static_files: StaticFilesStage) -> Self {
        self.stage(static_files)
    }

    /// Serves the schema document.
    #[must_use]
    pub fn schema_docs(self, docs: SchemaDocsStage) -> Self {
        self.stage(docs)
    }

    /// Answers operations without a handler from their declared examples
    /// instead of 501. Operations with no 2xx response still get 501.
    #[must_use]
    pub fn mock_unbound(mut self, enabled: bool) -> Self {
        self.mock_unbound = enabled;
        self
    }

    /// Replaces the parse stage, e.g. to change the body limit.
    #[must_use]
    pub fn parse(mut self, parse: ParseStage) -> Self {
        self.parse = parse;
        self
    }

    /// Sets validator options.
    #[must_use]
    pub fn validator_options(mut self, options: ValidatorOptions) -> Self {
        self.validator_options = options;
        self
    }

    /// Appends a gatekeeper. Gatekeepers run in the order they are added.
    #[must_use]
    pub fn gatekeeper(self, gate: impl Gatekeeper) -> Self {
        self.stage(GatekeeperStage::new(gate))
    }

    /// Adds a custom stage in its declared phase.
    #[must_use]
    pub fn stage(mut self, stage: impl Stage) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Replaces the error classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Sets the request id policy.
    #[must_use]
    pub fn request_ids(mut self, policy: RequestIdPolicy) -> Self {
        self.request_ids = policy;
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        for operation_id in self.handlers.unbound(&self.schema) {
            if self.mock_unbound {
                tracing::info!(operation_id, "operation has no handler; answering from examples");
            } else {
                tracing::warn!(operation_id, "operation has no handler; requests will get 501");
            }
        }
        for operation_id in self.handlers.undeclared(&self.schema) {
            tracing::warn!(%operation_id, "handler registered for an undeclared operation");
        }

        let mut stages: Vec<Box<dyn Stage>> = Vec::with_capacity(self.stages.len() + 3);
        stages.push(Box::new(self.cors.clone()));
        stages.push(Box::new(self.parse));
        stages.push(Box::new(ValidationStage::new(
            Arc::clone(&self.schema),
            self.validator_options,
        )));
        stages.extend(self.stages);
        stages.sort_by_key(|s| s.phase());

        let pipeline = Pipeline {
            stages,
            cors: self.cors,
            handlers: self.handlers,
            classifier: self.classifier,
            request_ids: self.request_ids,
            schema: self.schema,
            mock_unbound: self.mock_unbound,
        };
        tracing::debug!(stages = ?pipeline.stage_names(), "pipeline built");
        pipeline
    }
}
