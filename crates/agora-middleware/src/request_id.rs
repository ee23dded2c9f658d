//! Request ID assignment.
//!
//! The driver resolves the id before any stage runs, so every log line and
//! every response (including preflight and static responses) carries it.
//!
//! Incoming `X-Request-ID` headers are ignored unless the policy trusts them,
//! which should only be the case behind a proxy that assigns ids itself.

use agora_core::RequestId;
use http::{HeaderMap, HeaderValue};

use crate::types::Response;

/// The header name for request ID propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// How request ids are assigned.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdPolicy {
    trust_incoming: bool,
}

impl RequestIdPolicy {
    /// Always generates a fresh UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuses a valid incoming `X-Request-ID`.
    #[must_use]
    pub fn trust_incoming() -> Self {
        Self { trust_incoming: true }
    }

    /// Returns `true` if incoming ids are reused.
    #[must_use]
    pub const fn trusts_incoming(&self) -> bool {
        self.trust_incoming
    }

    /// Picks the id for a request.
    #[must_use]
    pub fn resolve(&self, headers: &HeaderMap) -> RequestId {
        if !self.trust_incoming {
            return RequestId::new();
        }
        headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(RequestId::parse)
            .unwrap_or_else(RequestId::new)
    }

    /// Sets the response header.
    pub fn stamp(&self, response: &mut Response, request_id: RequestId) {
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseExt;
    use http::StatusCode;

    fn headers_with_id(id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(id).unwrap());
        headers
    }

    #[test]
    fn test_ignores_incoming_id_when_not_trusted() {
        let incoming = "01234567-89ab-7def-8123-456789abcdef";
        let id = RequestIdPolicy::new().resolve(&headers_with_id(incoming));
        assert_ne!(id.to_string(), incoming);
    }

    #[test]
    fn test_uses_incoming_id_when_trusted() {
        let incoming = "01234567-89ab-7def-8123-456789abcdef";
        let id = RequestIdPolicy::trust_incoming().resolve(&headers_with_id(incoming));
        assert_eq!(id.to_string(), incoming);
    }

    #[test]
    fn test_ignores_invalid_incoming_id() {
        let id = RequestIdPolicy::trust_incoming().resolve(&headers_with_id("not-a-uuid"));
        assert_ne!(id.to_string(), "not-a-uuid");
    }

    #[test]
    fn test_stamp_sets_header() {
        let id = RequestId::new();
        let mut response = Response::empty(StatusCode::OK);
        RequestIdPolicy::new().stamp(&mut response, id);
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            id.to_string().as_str()
        );
    }
}
