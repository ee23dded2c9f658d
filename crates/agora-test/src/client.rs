//! In-memory client for a [`Pipeline`].

use std::collections::BTreeMap;
use std::sync::Arc;

use agora_middleware::Pipeline;
use bytes::Bytes;
use http::{header, Method};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::TestError;
use crate::request::TestRequest;
use crate::response::TestResponse;

/// Drives requests through a [`Pipeline`] without binding a port.
///
/// Cookies set by responses are kept and sent back on later requests, so
/// sessions work the way they do in a browser. Requests that carry their own
/// `Cookie` header bypass the jar.
///
/// # Example
///
/// ```ignore
/// let client = TestClient::new(pipeline);
///
/// let item = client.get("/items/7").send().await.assert_ok(StatusCode::OK);
/// assert_eq!(item["id"], 7);
///
/// client
///     .get("/items/nope")
///     .send()
///     .await
///     .assert_error(StatusCode::BAD_REQUEST, "VALIDATION_FAILED");
/// ```
#[must_use]
pub struct TestClient {
    pipeline: Arc<Pipeline>,
    default_headers: Vec<(String, String)>,
    jar: Option<Mutex<BTreeMap<String, String>>>,
}

impl TestClient {
    /// Creates a client for `pipeline`.
    pub fn new(pipeline: Pipeline) -> Self {
        Self::from_arc(Arc::new(pipeline))
    }

    /// Creates a client for a shared pipeline.
    pub fn from_arc(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            default_headers: Vec::new(),
            jar: Some(Mutex::new(BTreeMap::new())),
        }
    }

    /// Disables the cookie jar.
    pub fn without_cookies(mut self) -> Self {
        self.jar = None;
        self
    }

    /// Adds a header sent with every request unless the request sets it.
    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Returns the pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Returns a cookie from the jar.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.jar.as_ref()?.lock().get(name).cloned()
    }

    /// Empties the jar.
    pub fn clear_cookies(&self) {
        if let Some(jar) = &self.jar {
            jar.lock().clear();
        }
    }

    /// Starts a GET request.
    pub fn get(&self, uri: impl Into<String>) -> ClientRequest<'_> {
        self.request(TestRequest::get(uri))
    }

    /// Starts a POST request.
    pub fn post(&self, uri: impl Into<String>) -> ClientRequest<'_> {
        self.request(TestRequest::post(uri))
    }

    /// Starts a PUT request.
    pub fn put(&self, uri: impl Into<String>) -> ClientRequest<'_> {
        self.request(TestRequest::put(uri))
    }

    /// Starts a PATCH request.
    pub fn patch(&self, uri: impl Into<String>) -> ClientRequest<'_> {
        self.request(TestRequest::patch(uri))
    }

    /// Starts a DELETE request.
    pub fn delete(&self, uri: impl Into<String>) -> ClientRequest<'_> {
        self.request(TestRequest::delete(uri))
    }

    /// Starts an OPTIONS request.
    pub fn options(&self, uri: impl Into<String>) -> ClientRequest<'_> {
        self.request(TestRequest::options(uri))
    }

    /// Starts a request with any method.
    pub fn method(&self, method: Method, uri: impl Into<String>) -> ClientRequest<'_> {
        self.request(TestRequest::new(method, uri))
    }

    /// Wraps a prepared request.
    pub fn request(&self, request: TestRequest) -> ClientRequest<'_> {
        ClientRequest {
            client: self,
            request,
        }
    }

    /// Sends a prepared request.
    pub async fn send(&self, request: TestRequest) -> Result<TestResponse, TestError> {
        let mut request = request;
        for (name, value) in &self.default_headers {
            if !request.headers().contains_key(name.as_str()) {
                request = request.header(name, value);
            }
        }
        if let Some(jar) = &self.jar {
            if !request.headers().contains_key(header::COOKIE) {
                let cookies = jar.lock().clone();
                for (name, value) in cookies {
                    request = request.cookie(name, value);
                }
            }
        }

        let response = self.pipeline.process(request.into_http()?).await;
        let response = TestResponse::from_http(response).await?;
        self.store_cookies(&response);
        Ok(response)
    }

    fn store_cookies(&self, response: &TestResponse) {
        let Some(jar) = &self.jar else { return };
        let mut jar = jar.lock();
        for set_cookie in response.set_cookies() {
            let mut parts = set_cookie.split(';').map(str::trim);
            let Some((name, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
                continue;
            };
            let expired = parts.any(|attr| attr.eq_ignore_ascii_case("max-age=0"));
            if expired {
                jar.remove(name);
            } else {
                jar.insert(name.to_string(), value.to_string());
            }
        }
    }
}

impl std::fmt::Debug for TestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestClient")
            .field("pipeline", &self.pipeline)
            .field("cookies", &self.jar.as_ref().map(|j| j.lock().len()))
            .finish_non_exhaustive()
    }
}

/// A request bound to a [`TestClient`].
#[must_use]
pub struct ClientRequest<'a> {
    client: &'a TestClient,
    request: TestRequest,
}

impl ClientRequest<'_> {
    /// Sets a header.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.request = self.request.header(name, value);
        self
    }

    /// Sets `Origin`.
    pub fn origin(mut self, origin: impl AsRef<str>) -> Self {
        self.request = self.request.origin(origin);
        self
    }

    /// Sets `Authorization: Bearer <token>`.
    pub fn bearer_token(mut self, token: impl AsRef<str>) -> Self {
        self.request = self.request.bearer_token(token);
        self
    }

    /// Adds a cookie; the jar is skipped for this request.
    pub fn cookie(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.request = self.request.cookie(name, value);
        self
    }

    /// Sets a raw body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request = self.request.body(body);
        self
    }

    /// Sets a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.request = self.request.json(value);
        self
    }

    /// Sets a form body.
    pub fn form<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.request = self.request.form(value);
        self
    }

    /// Sends the request.
    ///
    /// # Panics
    ///
    /// Panics if the request cannot be built or the body cannot be read.
    pub async fn send(self) -> TestResponse {
        match self.try_send().await {
            Ok(response) => response,
            Err(e) => panic!("test request failed: {e}"),
        }
    }

    /// Sends the request, returning build and read errors.
    pub async fn try_send(self) -> Result<TestResponse, TestError> {
        self.client.send(self.request).await
    }
}
