//! Static file serving.
//!
//! Serves files below a root directory (default `public`) for GET and HEAD.
//! A match short-circuits the chain with [`Step::Respond`], so static
//! requests never reach parsing or validation. Anything else, including a
//! missing file, continues down the chain.
//!
//! Path segments are percent-decoded, so `/my%20file.txt` serves
//! `my file.txt`. Requests are refused with 403 when they try to leave the
//! root, either with `..` segments (encoded or not), an encoded separator, or
//! a symlink. Hidden files (a segment starting with `.`) are never served and
//! fall through like missing files.

use agora_core::{decode_path_segments, AgoraError, ApiRequest, BoxFuture, RequestContext};
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use crate::step::{Phase, Stage, Step};
use crate::types::{Response, ResponseExt};

/// Default static directory.
pub const DEFAULT_STATIC_DIR: &str = "public";

/// Outcome of resolving a request path against the root.
#[derive(Debug, PartialEq, Eq)]
enum Resolved {
    File(PathBuf),
    Missing,
    Refused(&'static str),
    Undecodable,
}

/// The static files stage.
#[derive(Debug, Clone)]
pub struct StaticFilesStage {
    root: PathBuf,
    index_file: Option<String>,
    cache_control: Option<String>,
}

impl Default for StaticFilesStage {
    fn default() -> Self {
        Self::new(DEFAULT_STATIC_DIR)
    }
}

impl StaticFilesStage {
    /// Serves files below `root`.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            index_file: Some("index.html".to_string()),
            cache_control: Some("public, max-age=0".to_string()),
        }
    }

    /// Sets the file served for directory requests; `None` disables it.
    #[must_use]
    pub fn index(mut self, index: Option<String>) -> Self {
        self.index_file = index;
        self
    }

    /// Sets the `Cache-Control` value; `None` omits the header.
    #[must_use]
    pub fn cache_control(mut self, value: Option<String>) -> Self {
        self.cache_control = value;
        self
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn resolve(&self, request_path: &str) -> Resolved {
        let Some(segments) = decode_path_segments(request_path) else {
            return Resolved::Undecodable;
        };
        if segments.iter().any(|s| s.contains(['/', '\\', '\0'])) {
            return Resolved::Refused("encoded separator");
        }
        let relative: PathBuf = segments.iter().collect();
        for component in relative.components() {
            match component {
                Component::ParentDir => return Resolved::Refused("directory traversal"),
                Component::Normal(name) if name.to_string_lossy().starts_with('.') => {
                    return Resolved::Missing;
                }
                Component::Normal(_) | Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => return Resolved::Refused("absolute path"),
            }
        }

        let Ok(root) = tokio::fs::canonicalize(&self.root).await else {
            return Resolved::Missing;
        };
        let Ok(mut path) = tokio::fs::canonicalize(root.join(&relative)).await else {
            return Resolved::Missing;
        };
        if !path.starts_with(&root) {
            return Resolved::Refused("path escapes the static root");
        }

        if path.is_dir() {
            let Some(index) = &self.index_file else {
                return Resolved::Missing;
            };
            path = path.join(index);
        }
        if path.is_file() {
            Resolved::File(path)
        } else {
            Resolved::Missing
        }
    }

    async fn serve(&self, path: &Path, headers: &HeaderMap, method: &Method) -> std::io::Result<Response> {
        let metadata = tokio::fs::metadata(path).await?;
        let modified = metadata.modified().ok();

        if let (Some(modified), Some(since)) = (modified, if_modified_since(headers)) {
            if unix_secs(modified) <= unix_secs(since) {
                let mut response = Response::empty(StatusCode::NOT_MODIFIED);
                self.add_cache_headers(&mut response, Some(modified));
                return Ok(response);
            }
        }

        let body = if method == Method::HEAD {
            Bytes::new()
        } else {
            Bytes::from(tokio::fs::read(path).await?)
        };

        let mut response = http::Response::new(http_body_util::Full::new(body));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(mime_type(path)),
        );
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
        self.add_cache_headers(&mut response, modified);
        Ok(response)
    }

    fn add_cache_headers(&self, response: &mut Response, modified: Option<SystemTime>) {
        let headers = response.headers_mut();
        if let Some(value) = self.cache_control.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(header::CACHE_CONTROL, value);
        }
        if let Some(value) = modified.and_then(|m| HeaderValue::from_str(&httpdate::fmt_http_date(m)).ok()) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
}

fn if_modified_since(headers: &HeaderMap) -> Option<SystemTime> {
    headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok())
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Returns the MIME type for a file extension.
#[must_use]
pub fn mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        "webmanifest" => "application/manifest+json",
        _ => "application/octet-stream",
    }
}

impl Stage for StaticFilesStage {
    fn name(&self) -> &'static str {
        "static"
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
            if request.method != Method::GET && request.method != Method::HEAD {
                return Step::Continue;
            }
            match self.resolve(&request.path).await {
                Resolved::Missing => Step::Continue,
                Resolved::Refused(reason) => {
                    Step::Fail(AgoraError::forbidden(format!("Static path refused: {reason}")))
                }
                Resolved::Undecodable => Step::Fail(AgoraError::malformed_path(&request.path)),
                Resolved::File(path) => match self.serve(&path, &request.headers, &request.method).await {
                    Ok(response) => Step::Respond(response),
                    Err(err) => Step::Fail(AgoraError::internal_with_source(
                        format!("failed to read {}", path.display()),
                        err,
                    )),
                },
            }
        })
    }
}
