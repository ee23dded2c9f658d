//! Process boot.
//!
//! The order is fixed:
//!
//! 1. log "starting worker";
//! 2. supervise the datastore connection, retrying until it answers;
//! 3. load the interface schema and assemble the pipeline;
//! 4. bind the listener, then create the temp directory;
//! 5. serve until SIGINT/SIGTERM, then drain.
//!
//! Nothing from step 3 on runs before the datastore is reachable.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agora_cache::{CacheConfig, EphemeralCache};
use agora_config::{AgoraConfig, CompressionEffort};
use agora_core::{HandlerRegistry, InterfaceSchema, ValidatorOptions};
use agora_middleware::stages::{
    CompressionLevel, CompressionStage, CorsStage, Environment, Gatekeeper, GatekeeperStage,
    Locals, LocalsStage, MemorySessionStore, ParseStage, SchemaDocsStage, SessionConfig,
    SessionStage, StaticFilesStage,
};
use agora_middleware::{PipelineBuilder, RequestIdPolicy};
use agora_server::{
    ConnectionSupervisor, Datastore, Server, ServerOptions, ShutdownSignal, Sleeper,
    TcpProbeDatastore,
};
use serde_json::{Map, Value};

use crate::error::AppError;

type BoundHook = Box<dyn FnOnce(SocketAddr) + Send>;

/// An Agora process: configuration, handlers and gatekeepers.
///
/// # Example
///
/// ```rust,ignore
/// let config = ConfigLoader::new().with_dotenv()?.with_optional_file("agora.toml")?.load()?;
/// agora_telemetry::init_telemetry(&config.telemetry)?;
///
/// App::new(config)
///     .handlers(handlers())
///     .gatekeeper(BearerTokenGate::new(verifier))
///     .run()
///     .await?;
/// ```
pub struct App {
    config: AgoraConfig,
    handlers: HandlerRegistry,
    gatekeepers: Vec<GatekeeperStage>,
    locals: Map<String, Value>,
    cache: Option<EphemeralCache>,
    datastore: Option<Arc<dyn Datastore>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    shutdown: Option<ShutdownSignal>,
    on_bound: Option<BoundHook>,
}

impl App {
    /// Creates an app with no handlers.
    #[must_use]
    pub fn new(config: AgoraConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::new(),
            gatekeepers: Vec::new(),
            locals: Map::new(),
            cache: None,
            datastore: None,
            sleeper: None,
            shutdown: None,
            on_bound: None,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &AgoraConfig {
        &self.config
    }

    /// Sets the business handlers.
    #[must_use]
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Appends a gatekeeper; they run in the order added.
    #[must_use]
    pub fn gatekeeper(mut self, gate: impl Gatekeeper) -> Self {
        self.gatekeepers.push(GatekeeperStage::new(gate));
        self
    }

    /// Adds an app-level value visible to every request.
    #[must_use]
    pub fn local(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.locals.insert(key.into(), value.into());
        self
    }

    /// Shares an existing cache instead of creating one from config.
    #[must_use]
    pub fn cache(mut self, cache: EphemeralCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replaces the TCP probe built from `datastore.uri`.
    #[must_use]
    pub fn datastore(mut self, datastore: Arc<dyn Datastore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    /// Replaces the retry timer.
    #[must_use]
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Uses this signal instead of SIGINT/SIGTERM.
    #[must_use]
    pub fn shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Called with the bound address once the listener is up.
    #[must_use]
    pub fn on_bound(mut self, hook: impl FnOnce(SocketAddr) + Send + 'static) -> Self {
        self.on_bound = Some(Box::new(hook));
        self
    }

    /// Boots and serves until shutdown.
    ///
    /// Waits for the datastore first, however long that takes.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] if the datastore URI, schema, or listener is
    /// unusable.
    pub async fn run(self) -> Result<(), AppError> {
        tracing::info!(
            worker = std::process::id(),
            service = %self.config.telemetry.service_name,
            "starting worker"
        );

        let datastore = match self.datastore.clone() {
            Some(datastore) => datastore,
            None => Arc::new(TcpProbeDatastore::from_uri(&self.config.datastore.uri)?),
        };
        let mut supervisor =
            ConnectionSupervisor::new(datastore, self.config.datastore.retry_delay());
        if let Some(sleeper) = self.sleeper.clone() {
            supervisor = supervisor.with_sleeper(sleeper);
        }

        supervisor.supervise(move || self.boot()).await
    }

    async fn boot(self) -> Result<(), AppError> {
        let Self {
            config,
            handlers,
            gatekeepers,
            locals,
            cache,
            shutdown,
            on_bound,
            ..
        } = self;

        let schema = Arc::new(InterfaceSchema::load(&config.schema.path)?);
        tracing::info!(
            path = %config.schema.path.display(),
            title = %schema.title(),
            operations = schema.operations().len(),
            "interface schema loaded"
        );

        let cache = cache.unwrap_or_else(|| {
            EphemeralCache::new(CacheConfig {
                default_ttl: config.cache.default_ttl(),
            })
        });
        let mut builder = pipeline_builder(&config, schema, handlers, cache, locals);
        for gate in gatekeepers {
            builder = builder.stage(gate);
        }
        let pipeline = Arc::new(builder.build());

        let bound = Server::new(pipeline, server_options(&config)?).bind().await?;
        tracing::info!(
            address = %bound.local_addr(),
            environment = %config.telemetry.environment,
            "listening"
        );
        if let Some(hook) = on_bound {
            hook(bound.local_addr());
        }

        let shutdown = shutdown.unwrap_or_else(ShutdownSignal::with_os_signals);
        bound.serve(shutdown).await?;
        Ok(())
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .field("gatekeepers", &self.gatekeepers.len())
            .finish_non_exhaustive()
    }
}

fn server_options(config: &AgoraConfig) -> Result<ServerOptions, AppError> {
    Ok(ServerOptions::builder()
        .addr(config.server.socket_addr()?)
        .shutdown_timeout(config.server.shutdown_timeout())
        .body_timeout(config.server.body_timeout())
        .max_body_bytes(config.server.max_body_bytes)
        .temp_dir(config.temp_dir.clone())
        .build())
}

fn cors_stage(config: &AgoraConfig) -> CorsStage {
    let cors = &config.cors;
    let mut builder = CorsStage::builder().allow_credentials(cors.allow_credentials);
    builder = if cors.allowed_origins.iter().any(|o| o == "*") {
        builder.allow_any_origin()
    } else {
        builder.allow_origins(cors.allowed_origins.iter().cloned())
    };
    match cors.max_age_secs {
        Some(secs) => builder.max_age(Duration::from_secs(secs)).build(),
        None => builder.no_max_age().build(),
    }
}

/// Assembles the configured stages around `schema` and `handlers`.
///
/// Gatekeepers are left to the caller.
#[must_use]
pub fn pipeline_builder(
    config: &AgoraConfig,
    schema: Arc<InterfaceSchema>,
    handlers: HandlerRegistry,
    cache: EphemeralCache,
    locals: Map<String, Value>,
) -> PipelineBuilder {
    let docs = config
        .schema
        .serve_docs
        .then(|| SchemaDocsStage::new(&schema))
        .transpose();
    let mut builder = agora_middleware::Pipeline::builder(schema, handlers)
        .cors(cors_stage(config))
        .mock_unbound(config.schema.mock_unbound)
        .parse(ParseStage::new().max_body_bytes(config.server.max_body_bytes))
        .validator_options(ValidatorOptions {
            distinguish_method_not_allowed: config.schema.distinguish_method_not_allowed,
        })
        .request_ids(if config.server.trust_request_id {
            RequestIdPolicy::trust_incoming()
        } else {
            RequestIdPolicy::new()
        })
        .locals(
            LocalsStage::new(cache)
                .environment(Environment::new(&config.telemetry.environment))
                .locals(Locals::new(locals)),
        );

    if config.compression.enabled {
        let level = match config.compression.level {
            CompressionEffort::Fast => CompressionLevel::Fast,
            CompressionEffort::Default => CompressionLevel::Default,
            CompressionEffort::Best => CompressionLevel::Best,
        };
        builder = builder.compression(
            CompressionStage::new()
                .min_size(config.compression.min_size)
                .level(level),
        );
    }

    if config.session.enabled {
        let session = SessionConfig {
            cookie_name: config.session.cookie_name.clone(),
            secure: config.session.secure,
            http_only: config.session.http_only,
            max_age: config.session.max_age_secs.map(Duration::from_secs),
            ..SessionConfig::default()
        };
        let store = MemorySessionStore::with_idle_ttl(Duration::from_secs(config.session.idle_ttl_secs));
        builder = builder.session(SessionStage::new(session, store));
    }

    if config.static_files.enabled {
        builder = builder.static_files(
            StaticFilesStage::new(&config.static_files.dir)
                .index(config.static_files.index.clone())
                .cache_control(config.static_files.cache_control.clone()),
        );
    }

    match docs {
        Ok(Some(docs)) => builder = builder.schema_docs(docs.path(config.schema.docs_path.clone())),
        Ok(None) => {}
        Err(error) => tracing::error!(%error, "schema document not served: serialization failed"),
    }

    builder
}
