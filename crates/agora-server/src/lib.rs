//! # Agora Server
//!
//! Process-level plumbing around the [`Pipeline`](agora_middleware::Pipeline):
//!
//! - [`ConnectionSupervisor`] gates boot on the datastore, retrying with a
//!   fixed delay until it answers
//! - [`Server`] binds the listener and serves each connection with hyper
//! - [`ShutdownSignal`] and [`ConnectionTracker`] drain connections on
//!   SIGINT/SIGTERM
//!
//! ## Example
//!
//! ```rust,ignore
//! use agora_server::{ConnectionSupervisor, Server, ServerOptions, ShutdownSignal, TcpProbeDatastore};
//!
//! let datastore = Arc::new(TcpProbeDatastore::from_uri("mongodb://localhost:27017/agora")?);
//! let supervisor = ConnectionSupervisor::new(datastore, Duration::from_secs(5));
//!
//! supervisor
//!     .supervise(|| async {
//!         let pipeline = Arc::new(build_pipeline()?);
//!         Server::new(pipeline, ServerOptions::default())
//!             .run(ShutdownSignal::with_os_signals())
//!             .await
//!     })
//!     .await?;
//! ```

#![doc(html_root_url = "https://docs.rs/agora-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod datastore;
pub mod error;
pub mod server;
pub mod shutdown;
pub mod supervisor;

pub use config::{ServerOptions, ServerOptionsBuilder};
pub use datastore::{Datastore, DatastoreHost, TcpProbeDatastore};
pub use error::{DatastoreError, ServerError};
pub use server::{BoundServer, Server};
pub use shutdown::{ConnectionToken, ConnectionTracker, ShutdownSignal};
pub use supervisor::{ConnectionState, ConnectionSupervisor, Sleeper, TokioSleeper};
