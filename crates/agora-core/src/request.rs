//! The parsed inbound request.

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::error::{AgoraError, AgoraResult};

/// Named parameter values (query, path, header).
///
/// Values start out as strings and are replaced with typed values once the
/// validator has coerced them.
pub type Params = BTreeMap<String, Value>;

/// An inbound request as seen by stages and handlers.
///
/// Built from the raw `http::Request` by the driver. The parse stage fills
/// `query` and `body`; the validation stage fills `path_params` and replaces
/// declared parameters with their coerced values.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Request path, without the query string.
    pub path: String,
    /// Raw query string, if any.
    pub query_string: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Cookies from the `Cookie` header.
    pub cookies: BTreeMap<String, String>,
    /// Raw body bytes.
    pub raw_body: Bytes,
    /// Parsed body. `Null` until the parse stage runs or when there is none.
    pub body: Value,
    /// Query parameters.
    pub query: Params,
    /// Path parameters extracted from the matched route.
    pub path_params: Params,
}

impl ApiRequest {
    /// Creates a request with no headers or body.
    #[must_use]
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, query_string) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (uri.to_string(), None),
        };
        Self {
            method,
            path,
            query_string,
            headers: HeaderMap::new(),
            cookies: BTreeMap::new(),
            raw_body: Bytes::new(),
            body: Value::Null,
            query: Params::new(),
            path_params: Params::new(),
        }
    }

    /// Converts a buffered `http::Request` into an `ApiRequest`.
    ///
    /// Cookies are read here so that the session stage can see them before
    /// the body is parsed.
    #[must_use]
    pub fn from_http(request: http::Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        let cookies = parse_cookies(&parts.headers);
        Self {
            method: parts.method,
            path: parts.uri.path().to_string(),
            query_string: parts.uri.query().map(str::to_string),
            headers: parts.headers,
            cookies,
            raw_body: body,
            body: Value::Null,
            query: Params::new(),
            path_params: Params::new(),
        }
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a cookie value.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Returns the content type without parameters, lowercased.
    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type").map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Returns a path parameter.
    #[must_use]
    pub fn path_param(&self, name: &str) -> Option<&Value> {
        self.path_params.get(name)
    }

    /// Returns a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&Value> {
        self.query.get(name)
    }

    /// Deserializes a path parameter into `T`.
    pub fn path_param_as<T: DeserializeOwned>(&self, name: &str) -> AgoraResult<T> {
        let value = self
            .path_params
            .get(name)
            .ok_or_else(|| AgoraError::internal(format!("path parameter '{name}' was not extracted")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| AgoraError::internal_with_source(format!("path parameter '{name}'"), e))
    }

    /// Deserializes the parsed body into `T`.
    ///
    /// A body that does not fit `T` is an application validation error.
    pub fn body_as<T: DeserializeOwned>(&self) -> AgoraResult<T> {
        serde_json::from_value(self.body.clone()).map_err(|e| AgoraError::validation(e.to_string()))
    }

    /// Builder-style: sets a header.
    #[must_use]
    pub fn with_header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Builder-style: sets the raw body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.raw_body = body.into();
        self
    }
}

/// Splits a request path into percent-decoded segments, dropping empty ones.
///
/// Segments are decoded after splitting, so `%2F` stays inside its segment.
/// Returns `None` when a segment does not decode to UTF-8.
///
/// ```
/// use agora_core::decode_path_segments;
///
/// assert_eq!(
///     decode_path_segments("/users/ada%20lovelace"),
///     Some(vec!["users".to_string(), "ada lovelace".to_string()])
/// );
/// assert_eq!(decode_path_segments("/bad/%FF"), None);
/// ```
#[must_use]
pub fn decode_path_segments(path: &str) -> Option<Vec<String>> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::decode(s).ok().map(Cow::into_owned))
        .collect()
}

/// Parses the `Cookie` header(s) into a name/value map.
///
/// Later duplicates do not overwrite earlier ones, matching how browsers
/// order more specific cookies first.
fn parse_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for value in headers.get_all(http::header::COOKIE) {
        let Ok(value) = value.to_str() else { continue };
        for pair in value.split(';') {
            if let Some((name, val)) = pair.trim().split_once('=') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                cookies
                    .entry(name.to_string())
                    .or_insert_with(|| val.trim().trim_matches('"').to_string());
            }
        }
    }
    cookies
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_TYPE, COOKIE};
    use http::HeaderValue;

    #[test]
    fn test_new_splits_query_string() {
        let req = ApiRequest::new(Method::GET, "/items?limit=5");
        assert_eq!(req.path, "/items");
        assert_eq!(req.query_string.as_deref(), Some("limit=5"));
    }

    #[test]
    fn test_from_http_reads_cookies() {
        let request = http::Request::builder()
            .uri("/items/1?x=1")
            .header(COOKIE, "JSESSION=abc; theme=\"dark\"")
            .header(COOKIE, "JSESSION=later")
            .body(Bytes::new())
            .unwrap();

        let req = ApiRequest::from_http(request);
        assert_eq!(req.path, "/items/1");
        assert_eq!(req.query_string.as_deref(), Some("x=1"));
        assert_eq!(req.cookie("JSESSION"), Some("abc"));
        assert_eq!(req.cookie("theme"), Some("dark"));
    }

    #[test]
    fn test_decode_path_segments() {
        assert_eq!(
            decode_path_segments("/files/a%2Fb//c%3Fd"),
            Some(vec!["files".to_string(), "a/b".to_string(), "c?d".to_string()])
        );
        assert_eq!(decode_path_segments("/plain+text"), Some(vec!["plain+text".to_string()]));
        assert_eq!(decode_path_segments("/%C3%28"), None);
    }

    #[test]
    fn test_content_type_strips_parameters() {
        let req = ApiRequest::new(Method::POST, "/items").with_header(
            CONTENT_TYPE,
            HeaderValue::from_static("Application/JSON; charset=utf-8"),
        );
        assert_eq!(req.content_type().as_deref(), Some("application/json"));
    }

    #[test]
    fn test_path_param_as() {
        let mut req = ApiRequest::new(Method::GET, "/items/42");
        req.path_params.insert("id".into(), Value::from(42));
        let id: i64 = req.path_param_as("id").unwrap();
        assert_eq!(id, 42);
        assert!(req.path_param_as::<i64>("missing").is_err());
    }

    #[test]
    fn test_body_as_reports_validation_error() {
        #[derive(serde::Deserialize)]
        #[allow(dead_code)]
        struct NewItem {
            name: String,
        }

        let mut req = ApiRequest::new(Method::POST, "/items");
        req.body = serde_json::json!({ "title": 1 });
        let err = req.body_as::<NewItem>().err().unwrap();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
