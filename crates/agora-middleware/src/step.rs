//! The stage contract consumed by the pipeline driver.
//!
//! A stage never calls the next stage. It inspects or mutates the request and
//! its context, then hands the driver a [`Step`] saying what to do next:
//!
//! - [`Step::Continue`] - run the next stage
//! - [`Step::Respond`] - stop and send this response
//! - [`Step::Fail`] - stop and send the error to the classifier
//!
//! Because the driver owns the loop, a stage cannot be re-entered or retried.

use agora_core::{AgoraError, ApiRequest, BoxFuture, RequestContext};

use crate::types::Response;

/// What the driver should do after a stage returns.
#[derive(Debug)]
pub enum Step {
    /// Proceed to the next stage.
    Continue,
    /// Short-circuit with a finished response.
    Respond(Response),
    /// Short-circuit with an error for the classifier.
    Fail(AgoraError),
}

impl Step {
    /// Converts a `Result` into `Continue` or `Fail`.
    #[must_use]
    pub fn from_result(result: Result<(), AgoraError>) -> Self {
        match result {
            Ok(()) => Self::Continue,
            Err(err) => Self::Fail(err),
        }
    }

    /// Returns `true` for `Continue`.
    #[must_use]
    pub const fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

impl From<AgoraError> for Step {
    fn from(err: AgoraError) -> Self {
        Self::Fail(err)
    }
}

/// Position of a stage in the chain.
///
/// The builder sorts stages by phase, so registration order can never put
/// session handling before CORS or a gatekeeper before validation. Stages that
/// share a phase keep their registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Cross-origin headers and preflight.
    Cors = 1,
    /// Response compression negotiation.
    Compression = 2,
    /// Session lookup from the cookie.
    Session = 3,
    /// Shared per-request utilities.
    Locals = 4,
    /// Static file serving.
    Static = 5,
    /// Query string and body parsing.
    Parse = 6,
    /// Schema validation.
    Validation = 7,
    /// User-supplied gatekeepers.
    Gatekeeper = 8,
}

impl Phase {
    /// Returns the phase name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Cors => "cors",
            Self::Compression => "compression",
            Self::Session => "session",
            Self::Locals => "locals",
            Self::Static => "static",
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::Gatekeeper => "gatekeeper",
        }
    }

    /// Returns all phases in execution order.
    #[must_use]
    pub const fn all() -> [Phase; 8] {
        [
            Self::Cors,
            Self::Compression,
            Self::Session,
            Self::Locals,
            Self::Static,
            Self::Parse,
            Self::Validation,
            Self::Gatekeeper,
        ]
    }
}

/// A request-handling stage.
pub trait Stage: Send + Sync + 'static {
    /// Stage name, used in logs and failure attribution.
    fn name(&self) -> &'static str;

    /// The phase this stage runs in.
    fn phase(&self) -> Phase;

    /// Processes the request before the handler.
    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: &'a mut ApiRequest,
    ) -> BoxFuture<'a, Step>;

    /// Post-processes the outgoing response.
    ///
    /// Called in reverse order on every stage whose `handle` ran, whatever the
    /// outcome. The default does nothing.
    fn after<'a>(
        &'a self,
        ctx: &'a RequestContext,
        request: &'a ApiRequest,
        response: &'a mut Response,
    ) -> BoxFuture<'a, ()> {
        let _ = (ctx, request, response);
        Box::pin(async {})
    }
}

/// An error together with the stage that produced it.
#[derive(Debug)]
pub struct StageFailure {
    stage: &'static str,
    error: AgoraError,
}

impl StageFailure {
    /// Attributes an error to a stage.
    #[must_use]
    pub fn new(stage: &'static str, error: AgoraError) -> Self {
        Self { stage, error }
    }

    /// Attributes an error to the business handler.
    #[must_use]
    pub fn from_handler(error: AgoraError) -> Self {
        Self::new("handler", error)
    }

    /// Returns the originating stage name.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        self.stage
    }

    /// Returns the error.
    #[must_use]
    pub const fn error(&self) -> &AgoraError {
        &self.error
    }

    /// Consumes the failure, returning the error.
    #[must_use]
    pub fn into_error(self) -> AgoraError {
        self.error
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.stage, self.error)
    }
}

impl std::error::Error for StageFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        let phases = Phase::all();
        assert!(phases.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(phases[0].name(), "cors");
        assert_eq!(phases[7].name(), "gatekeeper");
    }

    #[test]
    fn test_step_from_result() {
        assert!(Step::from_result(Ok(())).is_continue());
        let step = Step::from_result(Err(AgoraError::forbidden("no")));
        assert!(matches!(step, Step::Fail(ref e) if e.code() == "FORBIDDEN"));
    }

    #[test]
    fn test_stage_failure_display() {
        let failure = StageFailure::new("parse", AgoraError::malformed_body("bad json"));
        assert_eq!(failure.stage(), "parse");
        assert_eq!(failure.to_string(), "[parse] bad json");
    }
}
