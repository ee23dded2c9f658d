//! User-supplied gatekeepers.
//!
//! Gatekeepers run after validation, so they see the matched operation and
//! coerced parameters. They run in the order they were declared and the
//! first one that does not return `Continue` stops the chain.
//!
//! ```
//! use agora_core::AgoraError;
//! use agora_middleware::stages::FnGate;
//!
//! let gate = FnGate::new("not_pending", |_ctx, req| {
//!     if req.header("x-record-state") == Some("pending") {
//!         return Err(AgoraError::domain("RECORD_PENDING", "Record is pending review"));
//!     }
//!     Ok(())
//! });
//! # let _ = gate;
//! ```

use agora_core::{AgoraError, ApiRequest, BoxFuture, RequestContext};
use std::sync::Arc;

use crate::stages::validation::MatchedOperation;
use crate::step::{Phase, Stage, Step};

/// A gatekeeper check.
pub trait Gatekeeper: Send + Sync + 'static {
    /// Name used in logs and failure attribution.
    fn name(&self) -> &'static str;

    /// Decides whether the request may proceed.
    fn check<'a>(&'a self, ctx: &'a mut RequestContext, request: &'a ApiRequest) -> BoxFuture<'a, Step>;
}

/// Wraps a gatekeeper as a pipeline stage in the gatekeeper phase.
pub struct GatekeeperStage {
    gate: Box<dyn Gatekeeper>,
}

impl GatekeeperStage {
    /// Wraps a gatekeeper.
    #[must_use]
    pub fn new(gate: impl Gatekeeper) -> Self {
        Self { gate: Box::new(gate) }
    }
}

impl std::fmt::Debug for GatekeeperStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatekeeperStage")
            .field("name", &self.gate.name())
            .finish()
    }
}

impl Stage for GatekeeperStage {
    fn name(&self) -> &'static str {
        self.gate.name()
    }

    fn phase(&self) -> Phase {
        Phase::Gatekeeper
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: &'a mut ApiRequest,
    ) -> BoxFuture<'a, Step> {
        self.gate.check(ctx, request)
    }
}

/// A gatekeeper from a synchronous closure.
pub struct FnGate<F> {
    name: &'static str,
    check: F,
}

impl<F> FnGate<F>
where
    F: Fn(&RequestContext, &ApiRequest) -> Result<(), AgoraError> + Send + Sync + 'static,
{
    /// Creates a named closure gatekeeper.
    pub fn new(name: &'static str, check: F) -> Self {
        Self { name, check }
    }
}

impl<F> Gatekeeper for FnGate<F>
where
    F: Fn(&RequestContext, &ApiRequest) -> Result<(), AgoraError> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn check<'a>(&'a self, ctx: &'a mut RequestContext, request: &'a ApiRequest) -> BoxFuture<'a, Step> {
        let step = Step::from_result((self.check)(ctx, request));
        Box::pin(async move { step })
    }
}

/// The authenticated caller, attached by [`BearerTokenGate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Subject identifier.
    pub subject: String,
    /// Granted scopes.
    pub scopes: Vec<String>,
}

/// Checks bearer tokens. How tokens are issued is out of scope.
pub trait TokenVerifier: Send + Sync + 'static {
    /// Returns the principal for a valid token.
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Principal, AgoraError>>;
}

/// Requires a valid `Authorization: Bearer` token on operations marked
/// `requires_auth`. Other operations pass through untouched.
pub struct BearerTokenGate {
    verifier: Arc<dyn TokenVerifier>,
}

impl BearerTokenGate {
    /// Creates the gate around a verifier.
    #[must_use]
    pub fn new(verifier: impl TokenVerifier) -> Self {
        Self {
            verifier: Arc::new(verifier),
        }
    }

    fn bearer_token(request: &ApiRequest) -> Option<&str> {
        let value = request.header(http::header::AUTHORIZATION.as_str())?;
        let (scheme, token) = value.split_once(' ')?;
        let token = token.trim();
        (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
    }
}

impl std::fmt::Debug for BearerTokenGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenGate").finish_non_exhaustive()
    }
}

impl Gatekeeper for BearerTokenGate {
    fn name(&self) -> &'static str {
        "bearer_token"
    }

    fn check<'a>(&'a self, ctx: &'a mut RequestContext, request: &'a ApiRequest) -> BoxFuture<'a, Step> {
        Box::pin(async move {
            let requires_auth = ctx
                .get::<MatchedOperation>()
                .is_some_and(|op| op.requires_auth());
            if !requires_auth {
                return Step::Continue;
            }
            let Some(token) = Self::bearer_token(request) else {
                return Step::Fail(AgoraError::unauthorized("Missing bearer token"));
            };
            match self.verifier.verify(token).await {
                Ok(principal) => {
                    ctx.insert(principal);
                    Step::Continue
                }
                Err(err) => Step::Fail(err),
            }
        })
    }
}
