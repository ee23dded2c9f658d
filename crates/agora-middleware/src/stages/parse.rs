//! Query string and body parsing.
//!
//! - The query string is decoded with `serde_urlencoded`. A key given more
//!   than once becomes an array of its values.
//! - JSON bodies (`application/json`, `application/vnd.api+json`, any
//!   `+json` type) are parsed into `request.body`.
//! - Form bodies (`application/x-www-form-urlencoded`) become an object of
//!   strings, with repeated keys as arrays.
//! - Any other content type is left in `raw_body` untouched.
//!
//! An empty body parses to `null`.

use agora_core::{AgoraError, ApiRequest, BoxFuture, Params, RequestContext};
use serde_json::{Map, Value};

use crate::step::{Phase, Stage, Step};

/// Default body size limit (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// The parse stage.
#[derive(Debug, Clone)]
pub struct ParseStage {
    max_body_bytes: usize,
}

impl Default for ParseStage {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ParseStage {
    /// Creates a parse stage with the default limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the largest accepted body, in bytes.
    #[must_use]
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    fn parse(&self, request: &mut ApiRequest) -> Result<(), AgoraError> {
        if let Some(query) = request.query_string.as_deref() {
            request.query = parse_pairs(query)
                .map_err(|e| AgoraError::malformed_body(format!("Malformed query string: {e}")))?;
        }

        if request.raw_body.len() > self.max_body_bytes {
            return Err(AgoraError::payload_too_large(self.max_body_bytes));
        }
        if request.raw_body.is_empty() {
            return Ok(());
        }

        let content_type = request.content_type().unwrap_or_default();
        if is_json(&content_type) {
            request.body = serde_json::from_slice(&request.raw_body)
                .map_err(|e| AgoraError::malformed_body(format!("Malformed JSON body: {e}")))?;
        } else if content_type == "application/x-www-form-urlencoded" {
            let text = std::str::from_utf8(&request.raw_body)
                .map_err(|_| AgoraError::malformed_body("Form body is not valid UTF-8"))?;
            let fields = parse_pairs(text)
                .map_err(|e| AgoraError::malformed_body(format!("Malformed form body: {e}")))?;
            request.body = Value::Object(fields.into_iter().collect::<Map<String, Value>>());
        }
        Ok(())
    }
}

fn is_json(content_type: &str) -> bool {
    content_type == "application/json"
        || content_type == "application/vnd.api+json"
        || content_type.ends_with("+json")
}

/// Decodes `a=1&b=2&b=3` into `{a: "1", b: ["2", "3"]}`.
fn parse_pairs(input: &str) -> Result<Params, serde_urlencoded::de::Error> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(input)?;
    let mut params = Params::new();
    for (key, value) in pairs {
        match params.get_mut(&key) {
            None => {
                params.insert(key, Value::String(value));
            }
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
        }
    }
    Ok(params)
}

impl Stage for ParseStage {
    fn name(&self) -> &'static str {
        "parse"
    }

    fn phase(&self) -> Phase {
        Phase::Parse
    }

    fn handle<'a>(
        &'a self,
        _ctx: &'a mut RequestContext,
        request: &'a mut ApiRequest,
    ) -> BoxFuture<'a, Step> {
        Box::pin(async move { Step::from_result(self.parse(request)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::ProtocolKind;
    use http::{header, HeaderValue, Method};
    use serde_json::json;

    fn with_body(content_type: &'static str, body: &'static str) -> ApiRequest {
        ApiRequest::new(Method::POST, "/items")
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static(content_type))
            .with_body(body)
    }

    fn protocol_kind(err: &AgoraError) -> Option<ProtocolKind> {
        match err {
            AgoraError::Protocol { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    #[test]
    fn test_query_repeated_keys_become_arrays() {
        let params = parse_pairs("tag=a&limit=10&tag=b&tag=c&q=hello%20world").unwrap();
        assert_eq!(params["tag"], json!(["a", "b", "c"]));
        assert_eq!(params["limit"], json!("10"));
        assert_eq!(params["q"], json!("hello world"));
    }

    #[test]
    fn test_parses_json_body() {
        let mut request = with_body("application/json; charset=utf-8", r#"{"name":"lamp"}"#);
        ParseStage::new().parse(&mut request).unwrap();
        assert_eq!(request.body, json!({ "name": "lamp" }));
    }

    #[test]
    fn test_parses_vnd_api_json() {
        let mut request = with_body("application/vnd.api+json", r#"{"data":[]}"#);
        ParseStage::new().parse(&mut request).unwrap();
        assert_eq!(request.body, json!({ "data": [] }));
    }

    #[test]
    fn test_parses_form_body() {
        let mut request = with_body("application/x-www-form-urlencoded", "name=lamp&qty=2");
        ParseStage::new().parse(&mut request).unwrap();
        assert_eq!(request.body, json!({ "name": "lamp", "qty": "2" }));
    }

    #[test]
    fn test_other_content_type_kept_raw() {
        let mut request = with_body("text/plain", "hello");
        ParseStage::new().parse(&mut request).unwrap();
        assert!(request.body.is_null());
        assert_eq!(&request.raw_body[..], b"hello");
    }

    #[test]
    fn test_malformed_json_fails() {
        let mut request = with_body("application/json", "{not json");
        let err = ParseStage::new().parse(&mut request).unwrap_err();
        assert_eq!(protocol_kind(&err), Some(ProtocolKind::MalformedBody));
    }

    #[test]
    fn test_oversized_body_fails() {
        let mut request = with_body("application/json", r#"{"name":"a long enough body"}"#);
        let err = ParseStage::new().max_body_bytes(8).parse(&mut request).unwrap_err();
        assert_eq!(protocol_kind(&err), Some(ProtocolKind::PayloadTooLarge));
    }

    #[tokio::test]
    async fn test_stage_continues_on_empty_body() {
        let mut request = ApiRequest::new(Method::GET, "/items?limit=5");
        let mut ctx = RequestContext::new();
        assert!(ParseStage::new().handle(&mut ctx, &mut request).await.is_continue());
        assert_eq!(request.query["limit"], json!("5"));
        assert!(request.body.is_null());
    }
}
