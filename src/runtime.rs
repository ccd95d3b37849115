//! Server runtime: the resource cache, the scheduler and the processors
//! wired together with an explicit lifecycle.
//!
//! ```text
//! Runtime::new ─► ResourceCache ◄── FileWatcher
//!                   │    ▲
//!          load ────┘    └──── RequiredModuleProcessor
//!                   ▼
//!               Scheduler (rayon) ──► processors (tokio) ──► resume
//! ```
//!
//! The HTTP and WebSocket layers only talk to this type.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::WeaverConfig;
use crate::resource::watch::FileWatcher;
use crate::resource::{
    CreateError, EntrySummary, Locations, ResourceCache, ResourceKey, default_creators,
};
use crate::script::processor::{
    ClientMessageProcessor, ConnectionHub, HttpProcessor, HttpTransport, ProcessorRegistry,
    RequiredModuleProcessor, TimerProcessor, UreqTransport,
};
use crate::script::{
    Connection, ConnectionId, DirectiveCompiler, DocumentRequest, Entry, Scheduler,
    SchedulerStats, ScriptContext, ScriptEnvironment,
};
use crate::{debug, log};

/// Handler run for every document request once the script is initialized.
pub const READY_HANDLER: &str = "ready";
pub const OPEN_HANDLER: &str = "open";
pub const MESSAGE_HANDLER: &str = "message";
pub const CLOSE_HANDLER: &str = "close";

/// Inspection payload served at `/__resources`.
#[derive(Debug, Serialize)]
pub struct RuntimeReport {
    pub resources: Vec<EntrySummary>,
    pub scheduler: SchedulerStats,
    pub connections: usize,
}

/// A client connection bound to the script it was opened for.
pub struct Session {
    script: String,
    connection: Arc<dyn Connection>,
}

impl Session {
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn script(&self) -> &str {
        &self.script
    }
}

pub struct Runtime {
    /// Taken in `Drop` once the watcher and timers are cancelled.
    io: Option<tokio::runtime::Runtime>,
    handle: Handle,
    cache: Arc<ResourceCache>,
    scheduler: Scheduler,
    hub: Arc<ConnectionHub>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    pub fn new(config: &WeaverConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(UreqTransport))
    }

    /// Build with a custom outbound HTTP transport.
    pub fn with_transport(config: &WeaverConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let io = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.runtime.io_threads)
            .thread_name("weaver-io")
            .enable_time()
            .build()
            .context("Failed to start I/O runtime")?;
        let handle = io.handle().clone();

        let creators = default_creators(Arc::new(DirectiveCompiler));
        let cache = Arc::new(ResourceCache::new(
            creators,
            Locations::from_config(&config.resource),
        ));
        let hub = Arc::new(ConnectionHub::new());

        let mut processors = ProcessorRegistry::new();
        processors
            .register(Arc::new(RequiredModuleProcessor::new(
                Arc::clone(&cache),
                handle.clone(),
            )))
            .register(Arc::new(HttpProcessor::new(transport, handle.clone())))
            .register(Arc::new(ClientMessageProcessor::new(Arc::clone(&hub))))
            .register(Arc::new(TimerProcessor::new(handle.clone())));

        let scheduler = Scheduler::new(&config.runtime, handle.clone(), processors)
            .context("Failed to start evaluation pool")?;
        scheduler.listen_to(&cache);

        debug!(
            "runtime";
            "started with {} eval workers, {} io threads",
            config.runtime.worker_count(), config.runtime.io_threads
        );

        Ok(Self {
            io: Some(io),
            handle,
            cache,
            scheduler,
            hub,
            watcher: Mutex::new(None),
        })
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    // =========================================================================
    // Scripts
    // =========================================================================

    /// Load (or fetch the cached) environment for document script `name`.
    pub fn load_script(&self, name: &str) -> Result<Arc<ScriptEnvironment>, Arc<CreateError>> {
        let key = ResourceKey::script(name);
        let artifact = self.cache.load(&key)?;
        artifact
            .as_environment()
            .cloned()
            .ok_or_else(|| Arc::new(CreateError::Mismatch(key)))
    }

    /// Run script `name` for a document request.
    ///
    /// The first request initializes the environment; every request then
    /// runs the `ready` handler. The request is answered by the scheduler.
    pub fn handle_document(
        &self,
        name: &str,
        request: Arc<dyn DocumentRequest>,
    ) -> Result<(), Arc<CreateError>> {
        let environment = self.load_script(name)?;
        let context = ScriptContext::document_request(environment.key().clone(), request);
        self.scheduler
            .start(environment, context, Entry::handler(READY_HANDLER, Value::Null));
        Ok(())
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Register `connection` for script `name` and run its `open` handler.
    pub fn open_connection(
        &self,
        name: &str,
        connection: Arc<dyn Connection>,
    ) -> Result<Session, Arc<CreateError>> {
        let environment = self.load_script(name)?;
        self.hub.open(connection.id());

        let session = Session {
            script: name.to_string(),
            connection,
        };
        self.run_for(&session, environment, OPEN_HANDLER, Value::Null);
        Ok(session)
    }

    /// A script waiting on `receive` gets the message; otherwise the
    /// `message` handler runs with it.
    pub fn handle_message(&self, session: &Session, message: Value) -> Result<(), Arc<CreateError>> {
        let Err(message) = self.hub.deliver(session.id(), message) else {
            return Ok(());
        };

        // The script may have been reloaded since the connection opened.
        let environment = self.load_script(&session.script)?;
        self.run_for(session, environment, MESSAGE_HANDLER, message);
        Ok(())
    }

    /// Fail a waiting `receive` and run the `close` handler.
    pub fn close_connection(&self, session: Session) {
        self.hub.close(session.id());

        match self.load_script(&session.script) {
            Ok(environment) => self.run_for(&session, environment, CLOSE_HANDLER, Value::Null),
            Err(err) => debug!("ws"; "{} closed, script unavailable: {}", session.id(), err),
        }
    }

    fn run_for(
        &self,
        session: &Session,
        environment: Arc<ScriptEnvironment>,
        handler: &str,
        argument: Value,
    ) {
        let context = ScriptContext::connection(
            environment.key().clone(),
            Arc::clone(&session.connection),
        );
        self.scheduler
            .start(environment, context, Entry::handler(handler, argument));
    }

    // =========================================================================
    // Invalidation & lifecycle
    // =========================================================================

    /// Invalidate `key` and everything depending on it.
    pub fn invalidate(&self, key: &ResourceKey) -> Vec<ResourceKey> {
        self.cache.invalidate(key)
    }

    /// Start the file watcher on the I/O runtime.
    pub fn watch(&self, config: &WeaverConfig) -> Result<()> {
        let roots = config.resource.watch_roots();
        if roots.is_empty() {
            log!("watch"; "no resource directories to watch");
            return Ok(());
        }

        let watcher = FileWatcher::new(roots, config.config_path.clone())
            .context("Failed to start file watcher")?;
        let task = self.handle.spawn(watcher.run(Arc::clone(&self.cache)));
        if let Some(previous) = self.watcher.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    pub fn report(&self) -> RuntimeReport {
        RuntimeReport {
            resources: self.cache.snapshot(),
            scheduler: self.scheduler.stats(),
            connections: self.hub.len(),
        }
    }

    /// Stop the watcher, drop every cached resource and every pending
    /// continuation.
    pub fn shutdown(&self) {
        if let Some(task) = self.watcher.lock().take() {
            task.abort();
        }
        let cleared = self.cache.clear();
        self.scheduler.shutdown();
        debug!("runtime"; "shutdown: cleared {} resources", cleared);
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(io) = self.io.take() {
            io.shutdown_background();
        }
    }
}
