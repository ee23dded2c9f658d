//! Business handlers and their registry.
//!
//! A [`Handler`] is an async function of the frozen context and request. It is
//! only invoked after the request passed validation and every gatekeeper.
//! Handlers are registered per operation id in a [`HandlerRegistry`].

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{AgoraError, AgoraResult};
use crate::request::ApiRequest;
use crate::schema::InterfaceSchema;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A successful handler result, rendered as the success envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    status: StatusCode,
    data: Value,
}

impl Reply {
    /// A `200 OK` reply with `data`.
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            status: StatusCode::OK,
            data,
        }
    }

    /// A `201 Created` reply with `data`.
    #[must_use]
    pub fn created(data: Value) -> Self {
        Self {
            status: StatusCode::CREATED,
            data,
        }
    }

    /// A `200 OK` reply serialized from any `Serialize` value.
    pub fn json<T: Serialize>(data: &T) -> AgoraResult<Self> {
        serde_json::to_value(data)
            .map(Self::ok)
            .map_err(|e| AgoraError::internal_with_source("failed to serialize reply", e))
    }

    /// Overrides the status.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Returns the status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the data.
    #[must_use]
    pub const fn data(&self) -> &Value {
        &self.data
    }

    /// Consumes the reply, returning its data.
    #[must_use]
    pub fn into_data(self) -> Value {
        self.data
    }
}

/// The future a handler returns.
pub type HandlerFuture = BoxFuture<'static, AgoraResult<Reply>>;

/// A business handler.
///
/// Implemented for every `Fn(Arc<RequestContext>, Arc<ApiRequest>) -> impl Future`,
/// so plain async closures can be registered:
///
/// ```
/// use agora_core::{AgoraError, HandlerRegistry, Reply};
/// use serde_json::json;
///
/// let mut handlers = HandlerRegistry::new();
/// handlers.register("getItem", |_ctx, req| async move {
///     let id: i64 = req.path_param_as("id")?;
///     if id == 42 {
///         return Err(AgoraError::domain_not_found("Item", id.to_string()));
///     }
///     Ok(Reply::ok(json!({ "id": id })))
/// });
/// assert!(handlers.contains("getItem"));
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Handles a validated request.
    fn call(&self, ctx: Arc<RequestContext>, request: Arc<ApiRequest>) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Arc<RequestContext>, Arc<ApiRequest>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AgoraResult<Reply>> + Send + 'static,
{
    fn call(&self, ctx: Arc<RequestContext>, request: Arc<ApiRequest>) -> HandlerFuture {
        Box::pin(self(ctx, request))
    }
}

/// Handlers keyed by operation id.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an async function, replacing any previous handler for the operation.
    pub fn register<F, Fut>(&mut self, operation_id: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Arc<RequestContext>, Arc<ApiRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgoraResult<Reply>> + Send + 'static,
    {
        self.register_handler(operation_id, handler)
    }

    /// Registers any [`Handler`] implementation.
    pub fn register_handler(&mut self, operation_id: impl Into<String>, handler: impl Handler) -> &mut Self {
        self.handlers.insert(operation_id.into(), Arc::new(handler));
        self
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with<F, Fut>(mut self, operation_id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<RequestContext>, Arc<ApiRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgoraResult<Reply>> + Send + 'static,
    {
        self.register(operation_id, handler);
        self
    }

    /// Returns the handler for an operation.
    #[must_use]
    pub fn get(&self, operation_id: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(operation_id).cloned()
    }

    /// Returns `true` if a handler is registered for the operation.
    #[must_use]
    pub fn contains(&self, operation_id: &str) -> bool {
        self.handlers.contains_key(operation_id)
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Returns the schema operations that have no handler.
    #[must_use]
    pub fn unbound<'s>(&self, schema: &'s InterfaceSchema) -> Vec<&'s str> {
        schema
            .operations()
            .iter()
            .map(|op| op.operation_id())
            .filter(|id| !self.contains(id))
            .collect()
    }

    /// Returns registered operation ids that the schema does not declare.
    #[must_use]
    pub fn undeclared(&self, schema: &InterfaceSchema) -> Vec<String> {
        let mut ids: Vec<String> = self
            .handlers
            .keys()
            .filter(|id| schema.get_operation(id).is_none())
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.handlers.keys().collect();
        ids.sort();
        f.debug_struct("HandlerRegistry")
            .field("operations", &ids)
            .finish()
    }
}
