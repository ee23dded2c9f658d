//! Cross-origin resource sharing.
//!
//! CORS is always the first stage and cannot be left out of a pipeline. It
//! answers preflight requests itself and decorates every other response,
//! error responses included, in `after`.
//!
//! ## Example
//!
//! ```
//! use agora_middleware::stages::CorsStage;
//! use http::Method;
//! use std::time::Duration;
//!
//! let cors = CorsStage::builder()
//!     .allow_origin("https://app.example.com")
//!     .allow_methods([Method::GET, Method::POST])
//!     .allow_credentials(true)
//!     .max_age(Duration::from_secs(3600))
//!     .build();
//! assert!(cors.config().allowed_origins().is_allowed("https://app.example.com"));
//! ```

use agora_core::{AgoraError, ApiRequest, BoxFuture, RequestContext};
use http::{HeaderValue, Method, StatusCode};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::step::{Phase, Stage, Step};
use crate::types::{append_token, Response, ResponseExt};

/// CORS header names.
pub mod headers {
    /// `Access-Control-Allow-Origin` header.
    pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
    /// `Access-Control-Allow-Methods` header.
    pub const ALLOW_METHODS: &str = "access-control-allow-methods";
    /// `Access-Control-Allow-Headers` header.
    pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
    /// `Access-Control-Allow-Credentials` header.
    pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
    /// `Access-Control-Max-Age` header.
    pub const MAX_AGE: &str = "access-control-max-age";
    /// `Access-Control-Expose-Headers` header.
    pub const EXPOSE_HEADERS: &str = "access-control-expose-headers";
    /// `Access-Control-Request-Method` header (preflight).
    pub const REQUEST_METHOD: &str = "access-control-request-method";
    /// `Access-Control-Request-Headers` header (preflight).
    pub const REQUEST_HEADERS: &str = "access-control-request-headers";
    /// `Origin` header.
    pub const ORIGIN: &str = "origin";
}

/// The set of allowed origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Allow any origin (wildcard `*`).
    Any,
    /// Allow specific origins.
    List(BTreeSet<String>),
}

impl AllowedOrigins {
    /// Checks if an origin is allowed.
    #[must_use]
    pub fn is_allowed(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.contains(origin),
        }
    }

    /// Returns the `Access-Control-Allow-Origin` value for an origin.
    fn header_value(&self, origin: &str) -> Option<HeaderValue> {
        match self {
            Self::Any => Some(HeaderValue::from_static("*")),
            Self::List(origins) if origins.contains(origin) => HeaderValue::from_str(origin).ok(),
            Self::List(_) => None,
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    allowed_origins: AllowedOrigins,
    allowed_methods: BTreeSet<String>,
    allowed_headers: BTreeSet<String>,
    expose_headers: BTreeSet<String>,
    allow_credentials: bool,
    max_age: Option<Duration>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: AllowedOrigins::List(BTreeSet::new()),
            allowed_methods: [
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
            ]
            .iter()
            .map(|m| m.as_str().to_string())
            .collect(),
            allowed_headers: ["content-type", "authorization", "x-request-id"]
                .into_iter()
                .map(String::from)
                .collect(),
            expose_headers: BTreeSet::from(["x-request-id".to_string()]),
            allow_credentials: false,
            max_age: Some(Duration::from_secs(86400)),
        }
    }
}

impl CorsConfig {
    /// Returns the allowed origins.
    #[must_use]
    pub const fn allowed_origins(&self) -> &AllowedOrigins {
        &self.allowed_origins
    }

    /// Returns `true` if credentials are allowed.
    #[must_use]
    pub const fn allow_credentials(&self) -> bool {
        self.allow_credentials
    }

    /// Returns the preflight cache duration.
    #[must_use]
    pub const fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    fn allows_method(&self, method: &str) -> bool {
        self.allowed_methods.contains(&method.to_ascii_uppercase())
    }

    fn allows_header(&self, name: &str) -> bool {
        self.allowed_headers.contains("*") || self.allowed_headers.contains(name)
    }
}

/// Builder for [`CorsStage`].
#[derive(Debug, Clone, Default)]
pub struct CorsBuilder {
    config: CorsConfig,
}

impl CorsBuilder {
    /// Creates a builder with default settings (no origins allowed).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows any origin (wildcard `*`).
    ///
    /// Browsers reject `*` together with credentials.
    #[must_use]
    pub fn allow_any_origin(mut self) -> Self {
        self.config.allowed_origins = AllowedOrigins::Any;
        self
    }

    /// Adds an allowed origin. `*` switches to any origin.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        if origin == "*" {
            return self.allow_any_origin();
        }
        if let AllowedOrigins::List(origins) = &mut self.config.allowed_origins {
            origins.insert(origin);
        }
        self
    }

    /// Adds several allowed origins.
    #[must_use]
    pub fn allow_origins<I, S>(self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        origins.into_iter().fold(self, CorsBuilder::allow_origin)
    }

    /// Sets the allowed methods.
    #[must_use]
    pub fn allow_methods<I>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        self.config.allowed_methods = methods.into_iter().map(|m| m.as_str().to_string()).collect();
        self
    }

    /// Sets the allowed request headers. `*` allows any.
    #[must_use]
    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_headers = headers.into_iter().map(|h| h.into().to_lowercase()).collect();
        self
    }

    /// Sets headers exposed to scripts.
    #[must_use]
    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.expose_headers = headers.into_iter().map(|h| h.into().to_lowercase()).collect();
        self
    }

    /// Sets whether cookies and authorization headers may be sent.
    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.config.allow_credentials = allow;
        self
    }

    /// Sets how long browsers may cache a preflight answer.
    #[must_use]
    pub fn max_age(mut self, duration: Duration) -> Self {
        self.config.max_age = Some(duration);
        self
    }

    /// Disables preflight caching.
    #[must_use]
    pub fn no_max_age(mut self) -> Self {
        self.config.max_age = None;
        self
    }

    /// Builds the stage.
    #[must_use]
    pub fn build(self) -> CorsStage {
        CorsStage {
            config: self.config,
        }
    }
}

/// The CORS stage.
#[derive(Debug, Clone, Default)]
pub struct CorsStage {
    config: CorsConfig,
}

impl CorsStage {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> CorsBuilder {
        CorsBuilder::new()
    }

    /// Allows any origin, method and header. For development only.
    #[must_use]
    pub fn permissive() -> Self {
        CorsBuilder::new()
            .allow_any_origin()
            .allow_methods([
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
                Method::OPTIONS,
            ])
            .allow_headers(["*"])
            .build()
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &CorsConfig {
        &self.config
    }

    fn is_preflight(request: &ApiRequest) -> bool {
        request.method == Method::OPTIONS
            && request.headers.contains_key(headers::ORIGIN)
            && request.headers.contains_key(headers::REQUEST_METHOD)
    }

    /// Checks a preflight and returns the reason it is refused, if any.
    fn check_preflight(&self, request: &ApiRequest, origin: &str) -> Result<(), AgoraError> {
        if !self.config.allowed_origins.is_allowed(origin) {
            return Err(AgoraError::forbidden(format!("Origin '{origin}' is not allowed")));
        }

        if let Some(method) = request.header(headers::REQUEST_METHOD) {
            if !self.config.allows_method(method) {
                return Err(AgoraError::forbidden(format!("Method '{method}' is not allowed")));
            }
        }

        if let Some(requested) = request.header(headers::REQUEST_HEADERS) {
            let refused = requested
                .split(',')
                .map(|h| h.trim().to_lowercase())
                .find(|h| !h.is_empty() && !self.config.allows_header(h));
            if let Some(name) = refused {
                return Err(AgoraError::forbidden(format!("Header '{name}' is not allowed")));
            }
        }

        Ok(())
    }

    fn preflight_response(&self, origin: &str) -> Response {
        let mut response = Response::empty(StatusCode::NO_CONTENT);
        let headers = response.headers_mut();

        if let Some(value) = self.config.allowed_origins.header_value(origin) {
            headers.insert(headers::ALLOW_ORIGIN, value);
        }
        insert_list(headers, headers::ALLOW_METHODS, &self.config.allowed_methods);
        insert_list(headers, headers::ALLOW_HEADERS, &self.config.allowed_headers);
        if self.config.allow_credentials {
            headers.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if let Some(max_age) = self.config.max_age {
            headers.insert(headers::MAX_AGE, HeaderValue::from(max_age.as_secs()));
        }
        for token in ["Origin", "Access-Control-Request-Method", "Access-Control-Request-Headers"] {
            append_token(headers, http::header::VARY, token);
        }

        response
    }

    /// Adds allow-origin headers for the request's `Origin`, unless the
    /// response already carries them.
    ///
    /// Used by `after` and by the pipeline for failures that never entered
    /// the chain.
    pub fn decorate(&self, request_headers: &http::HeaderMap, response: &mut Response) {
        if response.headers().contains_key(headers::ALLOW_ORIGIN) {
            return;
        }
        if let Some(origin) = request_headers
            .get(headers::ORIGIN)
            .and_then(|v| v.to_str().ok())
        {
            self.add_cors_headers(response, origin);
        }
    }

    fn add_cors_headers(&self, response: &mut Response, origin: &str) {
        let Some(value) = self.config.allowed_origins.header_value(origin) else {
            return;
        };
        let headers = response.headers_mut();
        headers.insert(headers::ALLOW_ORIGIN, value);
        if self.config.allow_credentials {
            headers.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        insert_list(headers, headers::EXPOSE_HEADERS, &self.config.expose_headers);
        append_token(headers, http::header::VARY, "Origin");
    }
}

fn insert_list(headers: &mut http::HeaderMap, name: &'static str, values: &BTreeSet<String>) {
    if values.is_empty() {
        return;
    }
    let joined = values.iter().map(String::as_str).collect::<Vec<_>>().join(", ");
    if let Ok(value) = HeaderValue::from_str(&joined) {
        headers.insert(name, value);
    }
}

impl Stage for CorsStage {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn phase(&self) -> Phase {
        Phase::Cors
    }

    fn handle<'a>(
        &'a self,
        _ctx: &'a mut RequestContext,
        request: &'a mut ApiRequest,
    ) -> BoxFuture<'a, Step> {
        Box::pin(async move {
            if !Self::is_preflight(request) {
                return Step::Continue;
            }
            let origin = request.header(headers::ORIGIN).unwrap_or_default();
            match self.check_preflight(request, origin) {
                Ok(()) => Step::Respond(self.preflight_response(origin)),
                Err(err) => Step::Fail(err),
            }
        })
    }

    fn after<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        request: &'a ApiRequest,
        response: &'a mut Response,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.decorate(&request.headers, response) })
    }
}
