//! Shared per-request utilities.
//!
//! Attaches to every request context:
//!
//! - a handle to the process-owned [`EphemeralCache`]
//! - the [`Environment`] name
//! - the app-level [`Locals`] map
//!
//! All three are created once at boot; the stage only clones handles.

use agora_cache::EphemeralCache;
use agora_core::{ApiRequest, BoxFuture, RequestContext};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::step::{Phase, Stage, Step};

/// The deployment environment the process runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment(Arc<str>);

impl Environment {
    /// Creates an environment name.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Returns the name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Returns `true` for production and staging.
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(&*self.0, "production" | "staging")
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new("development")
    }
}

/// Read-only application values shared by every request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Locals(Arc<Map<String, Value>>);

impl Locals {
    /// Wraps a map of values.
    #[must_use]
    pub fn new(values: Map<String, Value>) -> Self {
        Self(Arc::new(values))
    }

    /// Returns a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns all values.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// The locals stage.
#[derive(Debug, Clone, Default)]
pub struct LocalsStage {
    cache: EphemeralCache,
    environment: Environment,
    locals: Locals,
}

impl LocalsStage {
    /// Creates the stage around the process-wide cache.
    #[must_use]
    pub fn new(cache: EphemeralCache) -> Self {
        Self {
            cache,
            environment: Environment::default(),
            locals: Locals::default(),
        }
    }

    /// Sets the environment.
    #[must_use]
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Sets the app-level values.
    #[must_use]
    pub fn locals(mut self, locals: Locals) -> Self {
        self.locals = locals;
        self
    }

    /// Returns the cache handle.
    #[must_use]
    pub const fn cache(&self) -> &EphemeralCache {
        &self.cache
    }
}

impl Stage for LocalsStage {
    fn name(&self) -> &'static str {
        "locals"
    }

    fn phase(&self) -> Phase {
        Phase::Locals
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        _request: &'a mut ApiRequest,
    ) -> BoxFuture<'a, Step> {
        Box::pin(async move {
            ctx.insert(self.cache.clone());
            ctx.insert(self.environment.clone());
            ctx.insert(self.locals.clone());
            Step::Continue
        })
    }
}
