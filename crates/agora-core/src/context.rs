//! The per-request context bag.
//!
//! Stages write into a [`RequestContext`] while the chain runs (operation id,
//! session, cache handle, locals). The driver then freezes it into an `Arc`
//! so handlers only ever read it.

use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Correlates a request's log lines and its `x-request-id` header.
///
/// Version 7 UUIDs, so ids sort by creation time.
///
/// ```
/// use agora_core::RequestId;
///
/// let id = RequestId::new();
/// assert_eq!(RequestId::parse(&id.to_string()), Some(id));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Mints a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Reads an id from a header value; `None` unless it is a UUID.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(Self)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Request id, matched operation, start instant, and typed extensions.
///
/// Handlers read what stages attached by type:
///
/// ```
/// use agora_core::RequestContext;
///
/// #[derive(Debug, PartialEq)]
/// struct Tenant(&'static str);
///
/// let mut ctx = RequestContext::new();
/// ctx.insert(Tenant("acme"));
/// assert_eq!(ctx.get::<Tenant>(), Some(&Tenant("acme")));
/// ```
pub struct RequestContext {
    request_id: RequestId,
    operation_id: Option<String>,
    started_at: Instant,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl RequestContext {
    /// A context with a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(RequestId::new())
    }

    /// A context for an id resolved by the caller.
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            operation_id: None,
            started_at: Instant::now(),
            extensions: HashMap::new(),
        }
    }

    /// The request id.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// The matched operation, once validation has run.
    #[must_use]
    pub fn operation_id(&self) -> Option<&str> {
        self.operation_id.as_deref()
    }

    /// Records the matched operation.
    pub fn set_operation_id(&mut self, operation_id: impl Into<String>) {
        self.operation_id = Some(operation_id.into());
    }

    /// Time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Attaches `value`, returning what was stored under the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.extensions
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|prev| prev.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Looks up an attached value by type.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
    }

    /// Mutable lookup, for stages that update what an earlier stage attached.
    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_mut::<T>())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("operation_id", &self.operation_id)
            .field("extensions", &self.extensions.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_parse_rejects_non_uuid() {
        assert_eq!(RequestId::parse("req-123"), None);
        let id = RequestId::new();
        assert_eq!(RequestId::parse(&format!(" {id} ")), Some(id));
    }

    #[test]
    fn test_extensions_are_keyed_by_type() {
        let mut ctx = RequestContext::new();
        assert!(ctx.insert(7_u32).is_none());
        ctx.insert(String::from("locals"));

        assert_eq!(ctx.get::<u32>(), Some(&7));
        assert_eq!(ctx.get::<String>().map(String::as_str), Some("locals"));

        assert_eq!(ctx.insert(9_u32), Some(7));
        *ctx.get_mut::<u32>().unwrap() += 1;
        assert_eq!(ctx.get::<u32>(), Some(&10));
        assert!(ctx.get::<i64>().is_none());
    }

    #[test]
    fn test_operation_id_is_unset_until_matched() {
        let mut ctx = RequestContext::new();
        assert!(ctx.operation_id().is_none());
        ctx.set_operation_id("getItem");
        assert_eq!(ctx.operation_id(), Some("getItem"));
    }
}
