//! Shared application state.
//!
//! This module provides [`AppState`], which holds the resources shared
//! across all HTTP request handlers: the engine, the compile-once loader,
//! the invoker with its registered host ABI, and the state store.

use std::sync::Arc;
use std::time::Instant;

use glass_common::{RuntimeConfig, RuntimeError};
use glass_core::{CompiledArtifact, Invoker, ModuleLoader, StateStore, WasmEngine};

/// Shared state across all request handlers.
///
/// Cloned per request; all heavyweight members live behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Wasmtime engine (shared across all requests).
    engine: WasmEngine,

    /// Compile-once loader holding the guest program.
    loader: Arc<ModuleLoader>,

    /// Invoker with the host ABI pre-registered.
    invoker: Arc<Invoker>,

    /// Shared state store.
    store: Arc<dyn StateStore>,

    /// Node identity reported by the diagnostic endpoints.
    node_id: Arc<str>,

    /// Process start time, for uptime reporting.
    started_at: Instant,
}

impl AppState {
    /// Create new application state.
    ///
    /// # Errors
    ///
    /// Returns an error if engine creation or host function registration
    /// fails.
    pub fn new(
        config: &RuntimeConfig,
        store: Arc<dyn StateStore>,
        node_id: &str,
    ) -> Result<Self, RuntimeError> {
        let engine = WasmEngine::new(&config.engine)?;
        let invoker = Arc::new(glass_host::create_invoker(
            &engine,
            config.execution.clone(),
            store.clone(),
        )?);

        Ok(Self {
            engine,
            loader: Arc::new(ModuleLoader::new()),
            invoker,
            store,
            node_id: Arc::from(node_id),
            started_at: Instant::now(),
        })
    }

    /// Get the Wasmtime engine.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Get the invoker.
    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// Get the module loader.
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Get the shared state store.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Get the node identity.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Seconds since this state was created.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Compile and install the guest program from WebAssembly bytes.
    ///
    /// A no-op returning the existing artifact if one is already loaded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModule` if the bytes do not compile.
    pub async fn load_guest(&self, bytes: &[u8]) -> Result<Arc<CompiledArtifact>, RuntimeError> {
        self.loader.get_or_load(self.engine.inner(), bytes).await
    }

    /// Compile and install the guest program from WAT.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModule` if the WAT does not compile.
    pub async fn load_guest_wat(&self, wat: &str) -> Result<Arc<CompiledArtifact>, RuntimeError> {
        self.loader.get_or_load_wat(self.engine.inner(), wat).await
    }

    /// Get the installed guest artifact, if any.
    pub fn artifact(&self) -> Option<Arc<CompiledArtifact>> {
        self.loader.artifact()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("node_id", &self.node_id)
            .field("guest_loaded", &self.loader.artifact().is_some())
            .finish_non_exhaustive()
    }
}
