//! Cookie-backed sessions.
//!
//! The session id travels in a cookie (default `JSESSION`). On the way in the
//! stage loads the session from a [`SessionStore`] or starts a new one and
//! attaches a [`Session`] handle to the context. On the way out it saves
//! modified sessions and issues the cookie the first time one is saved. A new
//! session nobody wrote to is dropped, so cookieless clients leave nothing
//! behind in the store.
//!
//! Handlers receive the context frozen behind an `Arc`, so the handle uses
//! interior mutability to let them write session data.

use agora_core::{AgoraError, ApiRequest, BoxFuture, RequestContext};
use dashmap::DashMap;
use http::{header, HeaderValue};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use uuid::Uuid;

use crate::step::{Phase, Stage, Step};
use crate::types::Response;

/// Default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "JSESSION";

/// How long [`MemorySessionStore`] keeps a session saved without a TTL.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Minimum time between expiry sweeps of [`MemorySessionStore`].
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Session payload.
pub type SessionData = Map<String, Value>;

/// Errors from a session store.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The backing store failed.
    #[error("session store error: {0}")]
    Store(String),

    /// Session data could not be (de)serialized.
    #[error("session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pluggable session persistence.
pub trait SessionStore: Send + Sync + 'static {
    /// Loads a session, returning `None` if it does not exist or expired.
    fn load<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<SessionData>, SessionError>>;

    /// Stores a session, replacing any previous data.
    fn save<'a>(
        &'a self,
        id: &'a str,
        data: &'a SessionData,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<(), SessionError>>;

    /// Removes a session.
    fn destroy<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), SessionError>>;
}

#[derive(Debug, Clone)]
struct StoredSession {
    data: SessionData,
    expires_at: Option<Instant>,
}

/// In-process session store. Sessions are lost on restart.
///
/// Every session expires: a save without a TTL uses the store's idle TTL.
/// Expired sessions are swept out during saves, at most once a minute, and
/// on demand with [`purge_expired`](Self::purge_expired).
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<String, StoredSession>>,
    idle_ttl: Duration,
    last_sweep: Arc<Mutex<Instant>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::with_idle_ttl(DEFAULT_IDLE_TTL)
    }
}

impl MemorySessionStore {
    /// Creates an empty store with the default idle TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store whose TTL-less sessions live for `idle_ttl`.
    #[must_use]
    pub fn with_idle_ttl(idle_ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            idle_ttl,
            last_sweep: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Removes expired sessions, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        *self.last_sweep.lock() = now;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !session.expires_at.is_some_and(|at| at <= now));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            tracing::debug!(removed, "purged expired sessions");
        }
        removed
    }

    fn sweep_due(&self) -> bool {
        self.last_sweep.lock().elapsed() >= SWEEP_INTERVAL
    }

    /// Returns the number of stored sessions, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn load<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<SessionData>, SessionError>> {
        Box::pin(async move {
            let expired = match self.sessions.get(id) {
                None => return Ok(None),
                Some(entry) => match entry.expires_at {
                    Some(at) if at <= Instant::now() => true,
                    _ => return Ok(Some(entry.data.clone())),
                },
            };
            if expired {
                self.sessions.remove(id);
            }
            Ok(None)
        })
    }

    fn save<'a>(
        &'a self,
        id: &'a str,
        data: &'a SessionData,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(async move {
            // An unrepresentable TTL keeps the session until the next restart.
            let expires_at = Instant::now().checked_add(ttl.unwrap_or(self.idle_ttl));
            self.sessions.insert(
                id.to_string(),
                StoredSession {
                    data: data.clone(),
                    expires_at,
                },
            );
            if self.sweep_due() {
                self.purge_expired();
            }
            Ok(())
        })
    }

    fn destroy<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(async move {
            self.sessions.remove(id);
            Ok(())
        })
    }
}

#[derive(Debug)]
struct SessionState {
    id: String,
    data: SessionData,
    is_new: bool,
    modified: bool,
    destroyed: bool,
}

/// Handle to the current request's session.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    fn new_with_id(id: String) -> Self {
        Self::from_state(SessionState {
            id,
            data: SessionData::new(),
            is_new: true,
            modified: false,
            destroyed: false,
        })
    }

    fn existing(id: String, data: SessionData) -> Self {
        Self::from_state(SessionState {
            id,
            data,
            is_new: false,
            modified: false,
            destroyed: false,
        })
    }

    fn from_state(state: SessionState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Returns the session id.
    #[must_use]
    pub fn id(&self) -> String {
        self.state.lock().id.clone()
    }

    /// Returns `true` if the session was created by this request.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.state.lock().is_new
    }

    /// Returns `true` if data was written during this request.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.state.lock().modified
    }

    /// Returns a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().data.get(key).cloned()
    }

    /// Returns a value deserialized into `T`.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Stores a value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut state = self.state.lock();
        state.data.insert(key.into(), value.into());
        state.modified = true;
    }

    /// Stores any serializable value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    pub fn insert_json<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<(), SessionError> {
        let value = serde_json::to_value(value)?;
        self.insert(key, value);
        Ok(())
    }

    /// Removes a value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut state = self.state.lock();
        let removed = state.data.remove(key);
        if removed.is_some() {
            state.modified = true;
        }
        removed
    }

    /// Marks the session for removal; the cookie is cleared in the response.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        state.data.clear();
        state.destroyed = true;
    }

    /// Returns a copy of all data.
    #[must_use]
    pub fn data(&self) -> SessionData {
        self.state.lock().data.clone()
    }
}

/// Session cookie settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cookie name.
    pub cookie_name: String,
    /// Cookie path.
    pub path: String,
    /// Adds `Secure`.
    pub secure: bool,
    /// Adds `HttpOnly`.
    pub http_only: bool,
    /// Cookie and store lifetime; `None` for a browser-session cookie.
    pub max_age: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            path: "/".to_string(),
            secure: false,
            http_only: true,
            max_age: None,
        }
    }
}

impl SessionConfig {
    fn cookie(&self, id: &str, clear: bool) -> String {
        let mut cookie = format!("{}={}; Path={}", self.cookie_name, id, self.path);
        if clear {
            cookie.push_str("; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT");
        } else if let Some(max_age) = self.max_age {
            cookie.push_str(&format!("; Max-Age={}", max_age.as_secs()));
            if let Some(expires) = SystemTime::now().checked_add(max_age) {
                cookie.push_str(&format!("; Expires={}", httpdate::fmt_http_date(expires)));
            }
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str("; SameSite=Lax");
        cookie
    }
}

/// The session stage.
#[derive(Clone)]
pub struct SessionStage {
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
}

impl std::fmt::Debug for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStage")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for SessionStage {
    fn default() -> Self {
        Self::new(SessionConfig::default(), MemorySessionStore::new())
    }
}

impl SessionStage {
    /// Creates a session stage over a store.
    #[must_use]
    pub fn new(config: SessionConfig, store: impl SessionStore) -> Self {
        Self {
            config,
            store: Arc::new(store),
        }
    }

    /// Creates a session stage over a shared store.
    #[must_use]
    pub fn with_shared_store(config: SessionConfig, store: Arc<dyn SessionStore>) -> Self {
        Self { config, store }
    }

    /// Returns the cookie settings.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn generate_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    async fn load(&self, request: &ApiRequest) -> Result<Session, SessionError> {
        let Some(id) = request.cookie(&self.config.cookie_name) else {
            return Ok(Session::new_with_id(Self::generate_id()));
        };
        match self.store.load(id).await? {
            Some(data) => Ok(Session::existing(id.to_string(), data)),
            None => Ok(Session::new_with_id(Self::generate_id())),
        }
    }

    fn set_cookie(response: &mut Response, cookie: &str) {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
}

impl Stage for SessionStage {
    fn name(&self) -> &'static str {
        "session"
    }

    fn phase(&self) -> Phase {
        Phase::Session
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: &'a mut ApiRequest,
    ) -> BoxFuture<'a, Step> {
        Box::pin(async move {
            match self.load(request).await {
                Ok(session) => {
                    ctx.insert(session);
                    Step::Continue
                }
                Err(err) => Step::Fail(AgoraError::internal_with_source("failed to load session", err)),
            }
        })
    }

    fn after<'a>(
        &'a self,
        ctx: &'a RequestContext,
        _request: &'a ApiRequest,
        response: &'a mut Response,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Some(session) = ctx.get::<Session>() else {
                return;
            };
            let (id, data, is_new, modified, destroyed) = {
                let state = session.state.lock();
                (
                    state.id.clone(),
                    state.data.clone(),
                    state.is_new,
                    state.modified,
                    state.destroyed,
                )
            };

            if destroyed {
                if let Err(err) = self.store.destroy(&id).await {
                    tracing::warn!(request_id = %ctx.request_id(), error = %err, "failed to destroy session");
                }
                if !is_new {
                    Self::set_cookie(response, &self.config.cookie(&id, true));
                }
                return;
            }

            if !modified {
                return;
            }
            if let Err(err) = self.store.save(&id, &data, self.config.max_age).await {
                tracing::warn!(request_id = %ctx.request_id(), error = %err, "failed to save session");
                return;
            }
            if is_new {
                Self::set_cookie(response, &self.config.cookie(&id, false));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseExt;
    use http::{Method, StatusCode};
    use serde_json::json;

    async fn round_trip(
        stage: &SessionStage,
        request: &mut ApiRequest,
        handler: impl FnOnce(&Session),
    ) -> (RequestContext, Response) {
        let mut ctx = RequestContext::new();
        assert!(stage.handle(&mut ctx, request).await.is_continue());
        handler(ctx.get::<Session>().unwrap());
        let mut response = Response::empty(StatusCode::OK);
        stage.after(&ctx, request, &mut response).await;
        (ctx, response)
    }

    fn cookie_value(response: &Response) -> String {
        let header = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        let pair = header.split(';').next().unwrap();
        pair.split_once('=').unwrap().1.to_string()
    }

    #[tokio::test]
    async fn test_new_session_issues_cookie_once_written() {
        let stage = SessionStage::default();
        let mut request = ApiRequest::new(Method::GET, "/");
        let (ctx, response) = round_trip(&stage, &mut request, |s| s.insert("seen", true)).await;

        let session = ctx.get::<Session>().unwrap();
        assert!(session.is_new());
        let header = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(header.starts_with("JSESSION="));
        assert!(header.contains("HttpOnly"));
        assert_eq!(cookie_value(&response), session.id());
    }

    #[tokio::test]
    async fn test_existing_session_is_reused_without_new_cookie() {
        let store = MemorySessionStore::new();
        let stage = SessionStage::new(SessionConfig::default(), store.clone());

        let mut first = ApiRequest::new(Method::GET, "/");
        let (_, response) = round_trip(&stage, &mut first, |s| s.insert("user", "ada")).await;
        let id = cookie_value(&response);

        let mut second = ApiRequest::new(Method::GET, "/");
        second.cookies.insert("JSESSION".to_string(), id.clone());
        let (ctx, response) = round_trip(&stage, &mut second, |_| {}).await;

        let session = ctx.get::<Session>().unwrap();
        assert!(!session.is_new());
        assert_eq!(session.id(), id);
        assert_eq!(session.get("user"), Some(json!("ada")));
        assert!(!response.headers().contains_key(header::SET_COOKIE));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_modified_session_is_saved() {
        let store = MemorySessionStore::new();
        let stage = SessionStage::new(SessionConfig::default(), store.clone());
        store.save("abc", &SessionData::new(), None).await.unwrap();

        let mut request = ApiRequest::new(Method::POST, "/cart");
        request.cookies.insert("JSESSION".to_string(), "abc".to_string());
        let mut ctx = RequestContext::new();
        stage.handle(&mut ctx, &mut request).await;
        ctx.get::<Session>().unwrap().insert("cart", json!([1, 2]));
        let mut response = Response::empty(StatusCode::OK);
        stage.after(&ctx, &request, &mut response).await;

        let stored = store.load("abc").await.unwrap().unwrap();
        assert_eq!(stored["cart"], json!([1, 2]));
    }

    #[tokio::test]
    async fn test_unknown_cookie_starts_fresh_session() {
        let stage = SessionStage::default();
        let mut request = ApiRequest::new(Method::GET, "/");
        request.cookies.insert("JSESSION".to_string(), "forged".to_string());
        let (ctx, _) = round_trip(&stage, &mut request, |_| {}).await;
        let session = ctx.get::<Session>().unwrap();
        assert!(session.is_new());
        assert_ne!(session.id(), "forged");
    }

    #[tokio::test]
    async fn test_destroy_clears_cookie() {
        let store = MemorySessionStore::new();
        store.save("abc", &SessionData::new(), None).await.unwrap();
        let stage = SessionStage::new(SessionConfig::default(), store.clone());

        let mut request = ApiRequest::new(Method::POST, "/logout");
        request.cookies.insert("JSESSION".to_string(), "abc".to_string());
        let mut ctx = RequestContext::new();
        stage.handle(&mut ctx, &mut request).await;
        ctx.get::<Session>().unwrap().destroy();
        let mut response = Response::empty(StatusCode::OK);
        stage.after(&ctx, &request, &mut response).await;

        assert!(store.is_empty());
        let header = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(header.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_untouched_new_sessions_are_not_stored() {
        let store = MemorySessionStore::new();
        let stage = SessionStage::new(SessionConfig::default(), store.clone());

        for _ in 0..100 {
            let mut request = ApiRequest::new(Method::GET, "/ping");
            let (_, response) = round_trip(&stage, &mut request, |s| {
                let _ = s.get("anything");
            })
            .await;
            assert!(!response.headers().contains_key(header::SET_COOKIE));
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_saves_without_ttl_use_idle_ttl() {
        let store = MemorySessionStore::with_idle_ttl(Duration::ZERO);
        store.save("a", &SessionData::new(), None).await.unwrap();
        store.save("b", &SessionData::new(), None).await.unwrap();
        store.save("kept", &SessionData::new(), Some(Duration::from_secs(60))).await.unwrap();

        assert_eq!(store.purge_expired(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.load("kept").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_panic() {
        let store = MemorySessionStore::new();
        store.save("s", &SessionData::new(), Some(Duration::MAX)).await.unwrap();
        assert!(store.load("s").await.unwrap().is_some());

        let config = SessionConfig {
            max_age: Some(Duration::from_secs(u64::MAX)),
            ..SessionConfig::default()
        };
        let cookie = config.cookie("xyz", false);
        assert!(cookie.contains(&format!("Max-Age={}", u64::MAX)));
        assert!(!cookie.contains("Expires="));
    }

    #[tokio::test]
    async fn test_memory_store_expiry() {
        let store = MemorySessionStore::new();
        store.save("short", &SessionData::new(), Some(Duration::ZERO)).await.unwrap();
        assert!(store.load("short").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_cookie_attributes() {
        let config = SessionConfig {
            secure: true,
            max_age: Some(Duration::from_secs(60)),
            ..SessionConfig::default()
        };
        let cookie = config.cookie("xyz", false);
        assert!(cookie.starts_with("JSESSION=xyz; Path=/; Max-Age=60; Expires="));
        assert!(cookie.contains("; Secure"));
    }

    #[test]
    fn test_session_typed_access() {
        let session = Session::new_with_id("s".to_string());
        session.insert_json("count", &3_u32).unwrap();
        assert_eq!(session.get_as::<u32>("count"), Some(3));
        assert!(session.is_modified());
        assert_eq!(session.remove("count"), Some(json!(3)));
        assert!(session.data().is_empty());
    }
}
