//! Serves the loaded interface schema as JSON.
//!
//! Opt-in. The document is serialized once when the stage is built and every
//! `GET` or `HEAD` on the configured path gets the same bytes back:
//!
//! ```rust,ignore
//! let docs = SchemaDocsStage::new(&schema)?.path("/api-docs");
//! let pipeline = Pipeline::builder(schema, handlers).schema_docs(docs).build();
//! ```
//!
//! Runs in the static phase, so the document is reachable even though it is
//! not one of the schema's own operations.

use agora_core::{ApiRequest, BoxFuture, InterfaceSchema, RequestContext};
use bytes::Bytes;
use http::{Method, StatusCode};

use crate::step::{Phase, Stage, Step};
use crate::types::{Response, ResponseExt};

/// Where the document is served unless configured otherwise.
pub const DEFAULT_DOCS_PATH: &str = "/api-docs";

/// The schema document stage.
#[derive(Debug, Clone)]
pub struct SchemaDocsStage {
    path: String,
    document: Bytes,
}

impl SchemaDocsStage {
    /// Serializes `schema` for serving at [`DEFAULT_DOCS_PATH`].
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the schema cannot be written as JSON.
    pub fn new(schema: &InterfaceSchema) -> Result<Self, serde_json::Error> {
        Ok(Self {
            path: DEFAULT_DOCS_PATH.to_string(),
            document: Bytes::from(serde_json::to_vec(schema)?),
        })
    }

    /// Serves the document somewhere else. A trailing slash is ignored.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = normalize(&path).to_string();
        self
    }

    /// Returns the path the document is served at.
    #[must_use]
    pub fn served_at(&self) -> &str {
        &self.path
    }
}

fn normalize(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

impl Stage for SchemaDocsStage {
    fn name(&self) -> &'static str {
        "schema_docs"
    }

    fn phase(&self) -> Phase {
        Phase::Static
    }

    fn handle<'a>(
        &'a self,
        _ctx: &'a mut RequestContext,
        request: &'a mut ApiRequest,
    ) -> BoxFuture<'a, Step> {
        Box::pin(async move {
            let readable = request.method == Method::GET || request.method == Method::HEAD;
            if !readable || normalize(&request.path) != self.path {
                return Step::Continue;
            }
            Step::Respond(Response::json_bytes(StatusCode::OK, self.document.clone()))
        })
    }
}
