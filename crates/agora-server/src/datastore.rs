//! Datastore availability.
//!
//! The server never talks to the datastore itself; it only needs to know the
//! datastore is there before it boots. [`Datastore`] is that seam.
//! [`TcpProbeDatastore`] treats a successful TCP connect to any of the URI's
//! hosts as "available".

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use agora_core::BoxFuture;
use tokio::net::TcpStream;

use crate::error::DatastoreError;

/// Default time allowed for a single TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// A datastore the server depends on.
pub trait Datastore: Send + Sync + 'static {
    /// Attempts one connection.
    fn connect(&self) -> BoxFuture<'_, Result<(), DatastoreError>>;

    /// Returns `true` once a connect has succeeded.
    fn is_connected(&self) -> bool;

    /// Describes the target for logs, without credentials.
    fn describe(&self) -> String;
}

/// One host of a datastore URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreHost {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl std::fmt::Display for DatastoreHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Probes datastore availability with a plain TCP connect.
///
/// # Example
///
/// ```
/// use agora_server::TcpProbeDatastore;
///
/// let store = TcpProbeDatastore::from_uri("mongodb://admin:pw@db1,db2:27018/agora").unwrap();
/// assert_eq!(store.hosts().len(), 2);
/// assert_eq!(store.hosts()[0].port, 27017);
/// assert_eq!(store.describe_target(), "mongodb://db1:27017,db2:27018/agora");
/// ```
#[derive(Debug)]
pub struct TcpProbeDatastore {
    scheme: String,
    hosts: Vec<DatastoreHost>,
    database: Option<String>,
    connect_timeout: Duration,
    connected: AtomicBool,
}

impl TcpProbeDatastore {
    /// Parses `scheme://[user[:password]@]host[:port][,host[:port]...][/database][?options]`.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::InvalidUri`] when the URI has no scheme, no
    /// host, a bad port, or a scheme without a known default port and no
    /// explicit one.
    pub fn from_uri(uri: &str) -> Result<Self, DatastoreError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| DatastoreError::invalid_uri(uri, "missing scheme"))?;
        if scheme.is_empty() {
            return Err(DatastoreError::invalid_uri(uri, "missing scheme"));
        }
        if scheme.ends_with("+srv") {
            return Err(DatastoreError::invalid_uri(
                uri,
                "SRV lookups are not supported; list hosts explicitly",
            ));
        }

        let rest = rest.split_once('?').map_or(rest, |(before, _)| before);
        let (authority, database) = match rest.split_once('/') {
            Some((authority, db)) if !db.is_empty() => (authority, Some(db.to_string())),
            Some((authority, _)) => (authority, None),
            None => (rest, None),
        };
        // Credentials end at the last '@'.
        let hosts_part = authority.rsplit_once('@').map_or(authority, |(_, h)| h);

        let default_port = default_port(scheme);
        let mut hosts = Vec::new();
        for raw in hosts_part.split(',') {
            hosts.push(parse_host(uri, raw, default_port)?);
        }

        Ok(Self {
            scheme: scheme.to_string(),
            hosts,
            database,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connected: AtomicBool::new(false),
        })
    }

    /// Sets the per-host connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns the parsed hosts in URI order.
    #[must_use]
    pub fn hosts(&self) -> &[DatastoreHost] {
        &self.hosts
    }

    /// Returns the database name, if the URI has one.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Returns the URI with credentials removed.
    #[must_use]
    pub fn describe_target(&self) -> String {
        let hosts = self
            .hosts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        match &self.database {
            Some(db) => format!("{}://{hosts}/{db}", self.scheme),
            None => format!("{}://{hosts}", self.scheme),
        }
    }

    async fn probe(&self) -> Result<(), DatastoreError> {
        let mut last_error = None;
        for host in &self.hosts {
            let target = host.to_string();
            match tokio::time::timeout(
                self.connect_timeout,
                TcpStream::connect((host.host.as_str(), host.port)),
            )
            .await
            {
                Ok(Ok(_stream)) => {
                    self.connected.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                Ok(Err(source)) => last_error = Some(DatastoreError::Unreachable { target, source }),
                Err(_) => last_error = Some(DatastoreError::Timeout { target }),
            }
        }
        Err(last_error.unwrap_or_else(|| DatastoreError::invalid_uri(&self.describe_target(), "no hosts")))
    }
}

impl Datastore for TcpProbeDatastore {
    fn connect(&self) -> BoxFuture<'_, Result<(), DatastoreError>> {
        Box::pin(self.probe())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        self.describe_target()
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "mongodb" => Some(27017),
        "postgres" | "postgresql" => Some(5432),
        "mysql" | "mariadb" => Some(3306),
        "redis" | "rediss" => Some(6379),
        _ => None,
    }
}

fn parse_host(uri: &str, raw: &str, default_port: Option<u16>) -> Result<DatastoreHost, DatastoreError> {
    if raw.is_empty() {
        return Err(DatastoreError::invalid_uri(uri, "empty host"));
    }

    let (host, port) = if let Some(bracketed) = raw.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| DatastoreError::invalid_uri(uri, "unterminated IPv6 literal"))?;
        (host, after.strip_prefix(':'))
    } else {
        match raw.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (raw, None),
        }
    };
    if host.is_empty() {
        return Err(DatastoreError::invalid_uri(uri, "empty host"));
    }

    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| DatastoreError::invalid_uri(uri, format!("bad port '{port}'")))?,
        None => default_port
            .ok_or_else(|| DatastoreError::invalid_uri(uri, "no port and no default for scheme"))?,
    };

    Ok(DatastoreHost {
        host: host.to_string(),
        port,
    })
}
