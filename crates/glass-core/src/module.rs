//! Guest module compilation.
//!
//! This module provides:
//! - [`CompiledArtifact`]: an immutable, shareable wrapper around a compiled
//!   Wasmtime [`Module`], borrowed read-only by every sandbox instance
//! - [`ModuleLoader`]: a compile-exactly-once guard amortizing the expensive
//!   compile step across all invocations for the process lifetime
//!
//! Compilation validates the guest's import surface up front: the artifact
//! may require only the two `env` state functions plus the WASI preview1
//! shim, so a module with any other import is rejected as invalid before an
//! invocation ever fails to instantiate.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::OnceCell;
use tracing::{info, instrument};
use wasmtime::{Engine, Module};

use glass_common::RuntimeError;

/// Host functions the bridge provides under the `env` module.
const HOST_ABI_MODULE: &str = "env";
const HOST_ABI_FUNCTIONS: [&str; 2] = ["set_state", "get_state"];

/// System-call emulation module registered alongside the bridge.
const WASI_MODULE: &str = "wasi_snapshot_preview1";

/// A compiled guest program.
///
/// Produced once at startup and borrowed (read-only) by unboundedly many
/// concurrent sandbox instantiations; it never mutates after creation.
#[derive(Clone)]
pub struct CompiledArtifact {
    /// The compiled Wasmtime module.
    module: Module,

    /// Hash of the original guest bytes, for diagnostics.
    content_hash: String,

    /// When this artifact was compiled.
    compiled_at: Instant,
}

impl CompiledArtifact {
    /// Compile a guest program from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModule` if the bytes are malformed or the module
    /// imports anything outside the host ABI and the WASI shim.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes)
            .map_err(|e| RuntimeError::invalid_module(format!("compilation failed: {e}")))?;

        Self::validate_imports(&module)?;

        let content_hash = compute_hash(bytes);
        let duration = start.elapsed();

        info!(
            content_hash = %content_hash,
            duration_ms = duration.as_millis(),
            "Guest module compiled"
        );

        Ok(Self {
            module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Compile a guest program from WAT (WebAssembly Text Format).
    ///
    /// Used for the built-in guest program and for tests.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModule` if the WAT does not compile or the module
    /// imports anything outside the host ABI and the WASI shim.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        let module = Module::new(engine, wat)
            .map_err(|e| RuntimeError::invalid_module(format!("WAT compilation failed: {e}")))?;

        Self::validate_imports(&module)?;

        let content_hash = compute_hash(wat.as_bytes());
        let duration = start.elapsed();

        info!(
            content_hash = %content_hash,
            duration_ms = duration.as_millis(),
            "WAT guest module compiled"
        );

        Ok(Self {
            module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Compile a guest program from a `.wasm` file on disk.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModule` if the file cannot be read or does not
    /// compile.
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            RuntimeError::invalid_module(format!(
                "failed to read guest module '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_bytes(engine, &bytes)
    }

    /// Get the inner compiled module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Get the content hash of the original guest bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this artifact was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
        if bytes.len() < 8 {
            return Err(RuntimeError::invalid_module("file too small"));
        }

        // Check magic number: \0asm
        if &bytes[0..4] != b"\0asm" {
            return Err(RuntimeError::invalid_module("bad magic number"));
        }

        Ok(())
    }

    /// Reject modules importing anything beyond the two-function host ABI
    /// and the WASI preview1 shim.
    fn validate_imports(module: &Module) -> Result<(), RuntimeError> {
        for import in module.imports() {
            let supported = match import.module() {
                HOST_ABI_MODULE => HOST_ABI_FUNCTIONS.contains(&import.name()),
                WASI_MODULE => true,
                _ => false,
            };
            if !supported {
                return Err(RuntimeError::invalid_module(format!(
                    "unsupported import '{}::{}'",
                    import.module(),
                    import.name()
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CompiledArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Compile-exactly-once guard for the guest program.
///
/// Compilation is expensive; the loader runs it at most once per process
/// lifetime, even when N first invocations race on a cold loader, and hands
/// out the shared artifact afterwards. The compile count is observable so
/// the once-only property can be asserted.
#[derive(Default)]
pub struct ModuleLoader {
    artifact: OnceCell<Arc<CompiledArtifact>>,
    compile_count: AtomicU64,
}

impl ModuleLoader {
    /// Create a new, empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `bytes` if no artifact exists yet, otherwise return the
    /// already-compiled artifact.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModule` if compilation rejects the bytes. A failed
    /// compile leaves the loader empty, so a later call may retry.
    pub async fn get_or_load(
        &self,
        engine: &Engine,
        bytes: &[u8],
    ) -> Result<Arc<CompiledArtifact>, RuntimeError> {
        self.artifact
            .get_or_try_init(|| async {
                self.compile_count.fetch_add(1, Ordering::Relaxed);
                CompiledArtifact::from_bytes(engine, bytes).map(Arc::new)
            })
            .await
            .cloned()
    }

    /// WAT variant of [`get_or_load`](Self::get_or_load), for the built-in
    /// guest program.
    pub async fn get_or_load_wat(
        &self,
        engine: &Engine,
        wat: &str,
    ) -> Result<Arc<CompiledArtifact>, RuntimeError> {
        self.artifact
            .get_or_try_init(|| async {
                self.compile_count.fetch_add(1, Ordering::Relaxed);
                CompiledArtifact::from_wat(engine, wat).map(Arc::new)
            })
            .await
            .cloned()
    }

    /// Get the compiled artifact, if any.
    pub fn artifact(&self) -> Option<Arc<CompiledArtifact>> {
        self.artifact.get().cloned()
    }

    /// Number of times the compile step actually ran.
    pub fn compile_count(&self) -> u64 {
        self.compile_count.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("loaded", &self.artifact.initialized())
            .field("compile_count", &self.compile_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WasmEngine;
    use glass_common::EngineConfig;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    fn test_engine() -> WasmEngine {
        let config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        WasmEngine::new(&config).unwrap()
    }

    #[test]
    fn test_validate_wasm_header_valid() {
        assert!(CompiledArtifact::validate_wasm_header(MINIMAL_WASM).is_ok());
    }

    #[test]
    fn test_validate_wasm_header_too_small() {
        let result = CompiledArtifact::validate_wasm_header(&[0x00, 0x61]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_wasm_header_bad_magic() {
        let bad_wasm = &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        let result = CompiledArtifact::validate_wasm_header(bad_wasm);
        assert!(matches!(
            result.unwrap_err(),
            RuntimeError::InvalidModule { .. }
        ));
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16); // 64-bit hex
    }

    #[test]
    fn test_artifact_compilation() {
        let engine = test_engine();

        let artifact = CompiledArtifact::from_bytes(engine.inner(), MINIMAL_WASM).unwrap();
        assert!(!artifact.content_hash().is_empty());
        assert!(artifact.compiled_at().elapsed() < std::time::Duration::from_secs(60));
    }

    #[test]
    fn test_abi_imports_accepted() {
        let engine = test_engine();
        let wat = r#"
            (module
                (import "env" "set_state" (func (param i32 i32 i32)))
                (import "env" "get_state" (func (param i32 i32) (result i64)))
                (import "wasi_snapshot_preview1" "clock_time_get"
                    (func (param i32 i64 i32) (result i32)))
            )
        "#;

        assert!(CompiledArtifact::from_wat(engine.inner(), wat).is_ok());
    }

    #[test]
    fn test_unsupported_import_rejected() {
        let engine = test_engine();
        let wat = r#"
            (module
                (import "env" "launch_missiles" (func))
            )
        "#;

        let result = CompiledArtifact::from_wat(engine.inner(), wat);
        assert!(matches!(
            result.unwrap_err(),
            RuntimeError::InvalidModule { .. }
        ));
    }

    #[tokio::test]
    async fn test_loader_compiles_once() {
        let engine = test_engine();
        let loader = ModuleLoader::new();

        let first = loader.get_or_load(engine.inner(), MINIMAL_WASM).await.unwrap();
        let second = loader.get_or_load(engine.inner(), MINIMAL_WASM).await.unwrap();

        assert_eq!(loader.compile_count(), 1);
        assert_eq!(first.content_hash(), second.content_hash());
    }

    #[tokio::test]
    async fn test_loader_compiles_once_under_concurrency() {
        let engine = Arc::new(test_engine());
        let loader = Arc::new(ModuleLoader::new());

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let engine = engine.clone();
            let loader = loader.clone();
            tasks.push(tokio::spawn(async move {
                loader.get_or_load(engine.inner(), MINIMAL_WASM).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(loader.compile_count(), 1);
        assert!(loader.artifact().is_some());
    }

    #[tokio::test]
    async fn test_loader_invalid_module() {
        let engine = test_engine();
        let loader = ModuleLoader::new();

        let result = loader.get_or_load(engine.inner(), b"not wasm").await;
        assert!(matches!(
            result.unwrap_err(),
            RuntimeError::InvalidModule { .. }
        ));
        assert!(loader.artifact().is_none());
    }
}
