//! Common types used throughout the middleware pipeline.

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::Full;

/// The HTTP response type produced by the pipeline.
///
/// This is a standard `http::Response` with a `Full<Bytes>` body.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building responses without fallible builders.
pub trait ResponseExt {
    /// Creates a response with an empty body.
    fn empty(status: StatusCode) -> Response;

    /// Creates a JSON response from already-serialized bytes.
    fn json_bytes(status: StatusCode, body: impl Into<Bytes>) -> Response;

    /// Creates a plain-text response.
    fn text(status: StatusCode, body: impl Into<String>) -> Response;
}

impl ResponseExt for Response {
    fn empty(status: StatusCode) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;
        response
    }

    fn json_bytes(status: StatusCode, body: impl Into<Bytes>) -> Response {
        let mut response = http::Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        response
    }

    fn text(status: StatusCode, body: impl Into<String>) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(body.into())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

/// Appends a token to a comma-separated header such as `Vary`.
pub(crate) fn append_token(headers: &mut http::HeaderMap, name: header::HeaderName, token: &'static str) {
    let merged = match headers.get(&name).and_then(|v| v.to_str().ok()) {
        Some(existing) if existing.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)) => return,
        Some(existing) if !existing.is_empty() => format!("{existing}, {token}"),
        _ => token.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&merged) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_response() {
        let response = Response::json_bytes(StatusCode::NOT_FOUND, r#"{"success":false}"#);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
    }

    #[test]
    fn test_append_token_merges_vary() {
        let mut response = Response::empty(StatusCode::OK);
        append_token(response.headers_mut(), header::VARY, "Origin");
        append_token(response.headers_mut(), header::VARY, "Accept-Encoding");
        append_token(response.headers_mut(), header::VARY, "origin");
        assert_eq!(
            response.headers().get(header::VARY).unwrap(),
            "Origin, Accept-Encoding"
        );
    }
}
