//! HTTP server.
//!
//! Each connection is served by hyper http1 on its own task. The body is
//! buffered under a size limit and a read timeout, then the whole request is
//! handed to the [`Pipeline`]. Body failures never reach the pipeline; they are
//! shaped through [`Pipeline::reject`] so they still get the error envelope
//! and a request id.
//!
//! # Example
//!
//! ```rust,ignore
//! let server = Server::new(pipeline, ServerOptions::default());
//! let bound = server.bind().await?;
//! tracing::info!(address = %bound.local_addr(), "listening");
//! bound.serve(ShutdownSignal::with_os_signals()).await?;
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use agora_core::AgoraError;
use agora_middleware::{Pipeline, Response};
use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

use crate::config::ServerOptions;
use crate::error::ServerError;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Where body rejections are attributed in logs and metrics.
const BODY_STAGE: &str = "body";

/// An HTTP server for one pipeline.
pub struct Server {
    pipeline: Arc<Pipeline>,
    options: ServerOptions,
}

impl Server {
    /// Creates a server; nothing is bound yet.
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>, options: ServerOptions) -> Self {
        Self { pipeline, options }
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Binds the listener, then creates the temp directory.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address is taken and
    /// [`ServerError::TempDir`] if the directory cannot be created.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let addr = self.options.addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        if let Some(dir) = self.options.temp_dir() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| ServerError::TempDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        Ok(BoundServer {
            listener,
            local_addr,
            shared: Arc::new(Shared {
                pipeline: self.pipeline,
                options: self.options,
            }),
        })
    }

    /// Binds and serves until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// See [`bind`](Self::bind).
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        self.bind().await?.serve(shutdown).await
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

struct Shared {
    pipeline: Arc<Pipeline>,
    options: ServerOptions,
}

/// A server with a bound listener.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
}

impl BoundServer {
    /// Returns the bound address, with the real port if 0 was requested.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `shutdown` fires, then drains them.
    ///
    /// Open connections finish their in-flight request and are closed. Any
    /// still open after the shutdown timeout are abandoned.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; accept errors are logged and skipped.
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let token = tracker.acquire();
                        let shared = Arc::clone(&self.shared);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(shared, stream, shutdown).await {
                                tracing::debug!(%remote_addr, error = %e, "connection closed with error");
                            }
                            drop(token);
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "failed to accept connection"),
                },
                () = shutdown.recv() => break,
            }
        }

        let timeout = self.shared.options.shutdown_timeout();
        tracing::info!(
            open_connections = tracker.active_connections(),
            timeout_secs = timeout.as_secs_f64(),
            "shutting down; draining connections"
        );
        drop(self.listener);

        if tokio::time::timeout(timeout, tracker.drained()).await.is_err() {
            tracing::warn!(
                open_connections = tracker.active_connections(),
                "shutdown timeout reached with connections still open"
            );
        }
        tracing::info!("server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for BoundServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

async fn serve_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    shutdown: ShutdownSignal,
) -> Result<(), hyper::Error> {
    let service = service_fn(move |request: Request<Incoming>| {
        let shared = Arc::clone(&shared);
        async move { Ok::<_, Infallible>(handle(&shared, request).await) }
    });

    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => result,
        () = shutdown.recv() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    }
}

async fn handle(shared: &Shared, request: Request<Incoming>) -> Response {
    let (parts, body) = request.into_parts();
    let limit = shared.options.max_body_bytes();

    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return shared
            .pipeline
            .reject(&parts.headers, BODY_STAGE, AgoraError::payload_too_large(limit));
    }

    let timeout = shared.options.body_timeout();
    let bytes = match tokio::time::timeout(timeout, read_body(body, limit)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(error)) => return shared.pipeline.reject(&parts.headers, BODY_STAGE, error),
        Err(_) => {
            return shared.pipeline.reject(
                &parts.headers,
                BODY_STAGE,
                AgoraError::request_timeout(timeout),
            )
        }
    };

    shared
        .pipeline
        .process(http::Request::from_parts(parts, bytes))
        .await
}

async fn read_body(body: Incoming, limit: usize) -> Result<Bytes, AgoraError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(AgoraError::payload_too_large(limit))
        }
        Err(e) => Err(AgoraError::malformed_body(format!("failed to read request body: {e}"))),
    }
}
