//! The JSON response envelope.
//!
//! Every API response body has the same outer shape:
//!
//! ```json
//! { "success": true,  "data": { ... } }
//! { "success": false, "error": { "code": "NOT_FOUND", "message": "...", "detail": { ... } } }
//! ```

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// The `error` member of a failure envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl ErrorBody {
    /// Creates an error body without detail.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            detail: None,
        }
    }

    /// Attaches detail.
    #[must_use]
    pub fn with_detail(mut self, detail: Option<Value>) -> Self {
        self.detail = detail;
        self
    }
}

/// A response envelope, either success with data or failure with an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope<T> {
    /// `{ "success": true, "data": T }`
    Success(T),
    /// `{ "success": false, "error": ErrorBody }`
    Failure(ErrorBody),
}

impl<T> Envelope<T> {
    /// Returns `true` for the success branch.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl<T: Serialize> Serialize for Envelope<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Envelope", 2)?;
        match self {
            Self::Success(data) => {
                state.serialize_field("success", &true)?;
                state.serialize_field("data", data)?;
            }
            Self::Failure(error) => {
                state.serialize_field("success", &false)?;
                state.serialize_field("error", error)?;
            }
        }
        state.end()
    }
}

/// Serializes a success envelope to JSON bytes.
pub fn success_body<T: Serialize>(data: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&Envelope::Success(data))
}

/// Serializes a failure envelope to JSON bytes.
///
/// Serializing an [`ErrorBody`] cannot fail, so this returns bytes directly.
#[must_use]
pub fn failure_body(error: ErrorBody) -> Vec<u8> {
    let value = serde_json::json!({
        "success": false,
        "error": error,
    });
    value.to_string().into_bytes()
}
