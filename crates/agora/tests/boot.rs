//! Boots a full app against a fake datastore.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agora::config::AgoraConfig;
use agora::core::{BoxFuture, HandlerRegistry, Reply};
use agora::server::{Datastore, DatastoreError, ShutdownSignal, Sleeper};
use agora::{App, AppError};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

const SCHEMA: &str = r#"{
  "title": "boot-test",
  "operations": [
    { "operation_id": "ping", "method": "GET", "path": "/ping" }
  ]
}"#;

struct Flaky {
    failures: u32,
    calls: AtomicU32,
}

impl Flaky {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Datastore for Flaky {
    fn connect(&self) -> BoxFuture<'_, Result<(), DatastoreError>> {
        Box::pin(async move {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(DatastoreError::Timeout {
                    target: "flaky:1".to_string(),
                })
            } else {
                Ok(())
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.calls() > self.failures
    }

    fn describe(&self) -> String {
        "flaky://boot-test".to_string()
    }
}

#[derive(Default)]
struct CountingSleeper {
    sleeps: AtomicU32,
}

impl Sleeper for CountingSleeper {
    fn sleep(&self, _duration: Duration) -> BoxFuture<'_, ()> {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }
}

fn config(dir: &Path) -> AgoraConfig {
    let schema = dir.join("interface.json");
    std::fs::write(&schema, SCHEMA).unwrap();

    let mut config = AgoraConfig::development();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.shutdown_timeout_secs = 1;
    config.schema.path = schema;
    config.static_files.enabled = false;
    config.temp_dir = dir.join("temp");
    config
}

fn handlers() -> HandlerRegistry {
    HandlerRegistry::new().with("ping", |_ctx, _req| async { Ok(Reply::ok(json!("pong"))) })
}

async fn get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_binds_only_after_datastore_answers() {
    let dir = tempfile::tempdir().unwrap();
    let datastore = Flaky::new(2);
    let sleeper = Arc::new(CountingSleeper::default());
    let shutdown = ShutdownSignal::new();
    let (bound_tx, bound_rx) = oneshot::channel();

    let observed = Arc::clone(&datastore);
    let app = App::new(config(dir.path()))
        .handlers(handlers())
        .datastore(datastore.clone())
        .sleeper(sleeper.clone())
        .shutdown(shutdown.clone())
        .on_bound(move |addr| {
            let _ = bound_tx.send((addr, observed.calls()));
        });
    let running = tokio::spawn(app.run());

    let (addr, calls_at_bind) = bound_rx.await.unwrap();
    assert_eq!(calls_at_bind, 3);
    assert_eq!(sleeper.sleeps.load(Ordering::SeqCst), 2);
    assert!(dir.path().join("temp").is_dir());

    let response = get(addr, "/ping").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains(r#""data":"pong""#), "{response}");
    assert!(response.to_ascii_lowercase().contains("x-request-id:"));

    let response = get(addr, "/nowhere").await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");
    assert!(response.contains("ROUTE_NOT_FOUND"), "{response}");

    shutdown.trigger();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_missing_schema_stops_boot_after_connect() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.schema.path = dir.path().join("missing.json");
    let datastore = Flaky::new(0);

    let result = App::new(config)
        .datastore(datastore.clone())
        .shutdown(ShutdownSignal::new())
        .run()
        .await;

    assert!(matches!(result, Err(AppError::Schema(_))));
    assert_eq!(datastore.calls(), 1);
    assert!(!dir.path().join("temp").exists());
}

#[tokio::test]
async fn test_unusable_datastore_uri() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.datastore.uri = "not a uri".to_string();

    let result = App::new(config).shutdown(ShutdownSignal::new()).run().await;
    assert!(matches!(result, Err(AppError::Datastore(_))));
}
