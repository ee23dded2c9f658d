//! Response compression.
//!
//! The stage negotiates nothing up front; in `after` it reads the request's
//! `Accept-Encoding`, picks the best algorithm both sides support and
//! compresses the finished body when it is large enough and of a
//! compressible type. Responses that would not shrink are left alone.

use agora_core::{ApiRequest, BoxFuture, RequestContext};
use bytes::Bytes;
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression as FlateLevel;
use http::{header, HeaderValue};
use http_body_util::{BodyExt, Full};
use std::io::Write;
use thiserror::Error;

use crate::step::{Phase, Stage, Step};
use crate::types::{append_token, Response};

/// Compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Gzip (RFC 1952).
    Gzip,
    /// Brotli (RFC 7932).
    Brotli,
    /// Deflate (RFC 1951).
    Deflate,
    /// No compression.
    Identity,
}

impl Algorithm {
    /// Returns the `Content-Encoding` token.
    #[must_use]
    pub const fn encoding_name(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Brotli => "br",
            Self::Deflate => "deflate",
            Self::Identity => "identity",
        }
    }

    /// Parses an `Accept-Encoding` token.
    #[must_use]
    pub fn from_encoding(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(Self::Gzip),
            "br" | "brotli" => Some(Self::Brotli),
            "deflate" => Some(Self::Deflate),
            "identity" => Some(Self::Identity),
            _ => None,
        }
    }
}

/// Compression level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Fastest, lowest ratio.
    Fast,
    /// Balanced.
    #[default]
    Default,
    /// Best ratio, slowest.
    Best,
    /// Explicit level (0-9 for gzip/deflate, 0-11 for brotli).
    Custom(u32),
}

impl CompressionLevel {
    fn to_flate_level(self) -> FlateLevel {
        match self {
            Self::Fast => FlateLevel::fast(),
            Self::Default => FlateLevel::default(),
            Self::Best => FlateLevel::best(),
            Self::Custom(level) => FlateLevel::new(level.min(9)),
        }
    }

    fn to_brotli_quality(self) -> i32 {
        match self {
            Self::Fast => 1,
            Self::Default => 6,
            Self::Best => 11,
            Self::Custom(level) => i32::try_from(level.min(11)).unwrap_or(11),
        }
    }
}

/// Error while compressing a body.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// The encoder failed.
    #[error("compression I/O error: {0}")]
    Io(#[from] std::io::Error),
}

const COMPRESSIBLE_TYPES: &[&str] = &[
    "text/plain",
    "text/html",
    "text/css",
    "text/javascript",
    "text/xml",
    "text/csv",
    "application/json",
    "application/vnd.api+json",
    "application/javascript",
    "application/xml",
    "application/ld+json",
    "application/manifest+json",
    "image/svg+xml",
];

/// The compression stage.
#[derive(Debug, Clone)]
pub struct CompressionStage {
    algorithms: Vec<Algorithm>,
    min_size: usize,
    level: CompressionLevel,
}

impl Default for CompressionStage {
    fn default() -> Self {
        Self {
            algorithms: vec![Algorithm::Brotli, Algorithm::Gzip, Algorithm::Deflate],
            min_size: 1024,
            level: CompressionLevel::Default,
        }
    }
}

impl CompressionStage {
    /// Creates a stage with the default settings (1 KiB threshold).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the supported algorithms.
    #[must_use]
    pub fn algorithms(mut self, algorithms: impl IntoIterator<Item = Algorithm>) -> Self {
        self.algorithms = algorithms.into_iter().collect();
        self
    }

    /// Sets the minimum body size, in bytes, worth compressing.
    #[must_use]
    pub fn min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// Sets the compression level.
    #[must_use]
    pub fn level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    /// Parses `Accept-Encoding` into algorithms with quality values, best first.
    fn parse_accept_encoding(value: &str) -> Vec<(Algorithm, f32)> {
        let mut encodings: Vec<(Algorithm, f32)> = value
            .split(',')
            .filter_map(|part| {
                let mut pieces = part.split(';');
                let algorithm = Algorithm::from_encoding(pieces.next()?)?;
                let quality = pieces
                    .filter_map(|p| p.trim().strip_prefix("q="))
                    .find_map(|q| q.trim().parse::<f32>().ok())
                    .map_or(1.0, |q| q.clamp(0.0, 1.0));
                Some((algorithm, quality))
            })
            .collect();
        encodings.sort_by(|a, b| b.1.total_cmp(&a.1));
        encodings
    }

    fn select_algorithm(&self, accept_encoding: &str) -> Option<Algorithm> {
        Self::parse_accept_encoding(accept_encoding)
            .into_iter()
            .filter(|(_, q)| *q > 0.0)
            .map(|(a, _)| a)
            .take_while(|a| *a != Algorithm::Identity)
            .find(|a| self.algorithms.contains(a))
    }

    fn is_compressible(content_type: &str) -> bool {
        let base = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        COMPRESSIBLE_TYPES.contains(&base.as_str())
    }

    /// Compresses `data` with `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoder fails.
    pub fn compress(&self, data: &[u8], algorithm: Algorithm) -> Result<Vec<u8>, CompressionError> {
        match algorithm {
            Algorithm::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), self.level.to_flate_level());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Algorithm::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), self.level.to_flate_level());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Algorithm::Brotli => {
                let mut output = Vec::new();
                let params = brotli::enc::BrotliEncoderParams {
                    quality: self.level.to_brotli_quality(),
                    ..Default::default()
                };
                brotli::BrotliCompress(&mut std::io::Cursor::new(data), &mut output, &params)?;
                Ok(output)
            }
            Algorithm::Identity => Ok(data.to_vec()),
        }
    }

    async fn compress_response(&self, algorithm: Algorithm, response: &mut Response) {
        let body = std::mem::replace(response.body_mut(), Full::new(Bytes::new()));
        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };

        if bytes.len() < self.min_size {
            *response.body_mut() = Full::new(bytes);
            return;
        }

        match self.compress(&bytes, algorithm) {
            Ok(compressed) if compressed.len() < bytes.len() => {
                *response.body_mut() = Full::new(Bytes::from(compressed));
                response.headers_mut().insert(
                    header::CONTENT_ENCODING,
                    HeaderValue::from_static(algorithm.encoding_name()),
                );
                response.headers_mut().remove(header::CONTENT_LENGTH);
            }
            Ok(_) => *response.body_mut() = Full::new(bytes),
            Err(err) => {
                tracing::warn!(error = %err, algorithm = algorithm.encoding_name(), "compression failed");
                *response.body_mut() = Full::new(bytes);
            }
        }
    }
}

impl Stage for CompressionStage {
    fn name(&self) -> &'static str {
        "compression"
    }

    fn phase(&self) -> Phase {
        Phase::Compression
    }

    fn handle<'a>(
        &'a self,
        _ctx: &'a mut RequestContext,
        _request: &'a mut ApiRequest,
    ) -> BoxFuture<'a, Step> {
        Box::pin(async { Step::Continue })
    }

    fn after<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        request: &'a ApiRequest,
        response: &'a mut Response,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            append_token(response.headers_mut(), header::VARY, "Accept-Encoding");

            if request.method == http::Method::HEAD
                || response.headers().contains_key(header::CONTENT_ENCODING)
            {
                return;
            }
            let compressible = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(Self::is_compressible);
            if !compressible {
                return;
            }
            let Some(algorithm) = request
                .header(header::ACCEPT_ENCODING.as_str())
                .and_then(|ae| self.select_algorithm(ae))
            else {
                return;
            };

            self.compress_response(algorithm, response).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseExt;
    use flate2::read::GzDecoder;
    use http::StatusCode;
    use std::io::Read;

    fn large_json() -> String {
        let items: Vec<String> = (0..200).map(|i| format!(r#"{{"id":{i},"name":"item"}}"#)).collect();
        format!("[{}]", items.join(","))
    }

    async fn after(stage: &CompressionStage, accept: &str, response: &mut Response) {
        let request = ApiRequest::new(http::Method::GET, "/items")
            .with_header(header::ACCEPT_ENCODING, HeaderValue::from_str(accept).unwrap());
        stage.after(&RequestContext::new(), &request, response).await;
    }

    async fn body_bytes(response: Response) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[test]
    fn test_algorithm_from_encoding() {
        assert_eq!(Algorithm::from_encoding("GZIP"), Some(Algorithm::Gzip));
        assert_eq!(Algorithm::from_encoding("br"), Some(Algorithm::Brotli));
        assert_eq!(Algorithm::from_encoding("compress"), None);
    }

    #[test]
    fn test_parse_accept_encoding_sorts_by_quality() {
        let encodings = CompressionStage::parse_accept_encoding("gzip;q=0.5, br;q=1.0, *");
        assert_eq!(encodings, vec![(Algorithm::Brotli, 1.0), (Algorithm::Gzip, 0.5)]);
    }

    #[test]
    fn test_select_algorithm() {
        let stage = CompressionStage::new().algorithms([Algorithm::Gzip]);
        assert_eq!(stage.select_algorithm("br, gzip"), Some(Algorithm::Gzip));
        assert_eq!(stage.select_algorithm("gzip;q=0"), None);
        assert_eq!(stage.select_algorithm("identity, gzip;q=0.5"), None);
    }

    #[test]
    fn test_compressible_types() {
        assert!(CompressionStage::is_compressible("application/json; charset=utf-8"));
        assert!(CompressionStage::is_compressible("text/html"));
        assert!(!CompressionStage::is_compressible("image/png"));
    }

    #[test]
    fn test_brotli_quality_clamped() {
        assert_eq!(CompressionLevel::Custom(100).to_brotli_quality(), 11);
        assert_eq!(CompressionLevel::Fast.to_brotli_quality(), 1);
    }

    #[tokio::test]
    async fn test_compresses_large_json_with_gzip() {
        let payload = large_json();
        let mut response = Response::json_bytes(StatusCode::OK, payload.clone());
        after(&CompressionStage::new(), "gzip", &mut response).await;

        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(response.headers().get(header::VARY).unwrap(), "Accept-Encoding");

        let compressed = body_bytes(response).await;
        let mut decoded = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn test_prefers_brotli_when_offered() {
        let mut response = Response::json_bytes(StatusCode::OK, large_json());
        after(&CompressionStage::new(), "gzip, br", &mut response).await;
        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "br");
    }

    #[tokio::test]
    async fn test_small_body_left_alone() {
        let mut response = Response::json_bytes(StatusCode::OK, r#"{"success":true}"#);
        after(&CompressionStage::new(), "gzip", &mut response).await;
        assert!(!response.headers().contains_key(header::CONTENT_ENCODING));
        assert_eq!(body_bytes(response).await, Bytes::from_static(br#"{"success":true}"#));
    }

    #[tokio::test]
    async fn test_incompressible_type_left_alone() {
        let mut response = Response::json_bytes(StatusCode::OK, large_json());
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
        after(&CompressionStage::new(), "gzip", &mut response).await;
        assert!(!response.headers().contains_key(header::CONTENT_ENCODING));
    }
}
