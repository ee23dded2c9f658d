//! Test response wrapper.

use std::fmt;

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TestError;

/// A buffered response with envelope-aware accessors and assertions.
pub struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl TestResponse {
    /// Buffers an `http::Response`.
    pub async fn from_http<B>(response: http::Response<B>) -> Result<Self, TestError>
    where
        B: http_body_util::BodyExt,
        B::Error: fmt::Display,
    {
        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| TestError::BodyRead(e.to_string()))?
            .to_bytes();
        Ok(Self::new(parts.status, parts.headers, body))
    }

    /// Creates a response from parts.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Returns the status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: impl AsRef<str>) -> Option<&HeaderValue> {
        self.headers.get(name.as_ref())
    }

    /// Returns a header value as a string.
    #[must_use]
    pub fn header_str(&self, name: impl AsRef<str>) -> Option<&str> {
        self.header(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the `X-Request-ID` header.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.header_str(agora_middleware::REQUEST_ID_HEADER)
    }

    /// Returns every `Set-Cookie` value.
    pub fn set_cookies(&self) -> impl Iterator<Item = &str> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
    }

    /// Returns the raw body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body as UTF-8 text.
    pub fn text(&self) -> Result<String, TestError> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| TestError::BodyRead(format!("invalid UTF-8: {e}")))
    }

    /// Deserializes the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TestError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Returns `data` from a success envelope.
    pub fn data(&self) -> Result<Value, TestError> {
        let mut envelope: Value = self.json()?;
        if envelope.get("success") == Some(&Value::Bool(true)) {
            Ok(envelope["data"].take())
        } else {
            Err(TestError::NotEnvelope(format!(
                "expected a success envelope, got {envelope}"
            )))
        }
    }

    /// Returns `error` from an error envelope.
    pub fn error(&self) -> Result<Value, TestError> {
        let mut envelope: Value = self.json()?;
        if envelope.get("success") == Some(&Value::Bool(false)) && envelope.get("error").is_some() {
            Ok(envelope["error"].take())
        } else {
            Err(TestError::NotEnvelope(format!(
                "expected an error envelope, got {envelope}"
            )))
        }
    }

    /// Returns `error.code` from an error envelope.
    pub fn error_code(&self) -> Result<String, TestError> {
        let error = self.error()?;
        error["code"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TestError::NotEnvelope(format!("error without code: {error}")))
    }

    /// Asserts the status.
    ///
    /// # Panics
    ///
    /// Panics on mismatch, printing the body.
    #[track_caller]
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status, expected,
            "expected status {expected}, got {}: {}",
            self.status,
            String::from_utf8_lossy(&self.body)
        );
        self
    }

    /// Asserts a success envelope with the given status and returns `data`.
    ///
    /// # Panics
    ///
    /// Panics if the status differs or the body is not a success envelope.
    #[track_caller]
    pub fn assert_ok(&self, expected: StatusCode) -> Value {
        self.assert_status(expected);
        match self.data() {
            Ok(data) => data,
            Err(e) => panic!("{e}"),
        }
    }

    /// Asserts an error envelope with the given status and code.
    ///
    /// # Panics
    ///
    /// Panics if the status or code differs.
    #[track_caller]
    pub fn assert_error(&self, expected: StatusCode, code: &str) -> &Self {
        self.assert_status(expected);
        match self.error_code() {
            Ok(actual) => assert_eq!(actual, code, "unexpected error code"),
            Err(e) => panic!("{e}"),
        }
        self
    }

    /// Asserts a header value.
    ///
    /// # Panics
    ///
    /// Panics if the header is missing or differs.
    #[track_caller]
    pub fn assert_header(&self, name: impl AsRef<str>, expected: impl AsRef<str>) -> &Self {
        let name = name.as_ref();
        assert_eq!(
            self.header_str(name),
            Some(expected.as_ref()),
            "header {name}"
        );
        self
    }
}

impl fmt::Debug for TestResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &String::from_utf8_lossy(&self.body))
            .finish()
    }
}
