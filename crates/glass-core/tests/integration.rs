//! Full-pipeline tests: loader, engine, host ABI, sandbox lifecycle.

use std::sync::Arc;

use glass_common::{EngineConfig, ExecutionConfig, RuntimeError};
use glass_core::{CompiledArtifact, Invoker, MemoryStore, ModuleLoader, StateStore, WasmEngine};

fn test_engine() -> WasmEngine {
    let config = EngineConfig {
        pooling_allocator: false,
        epoch_interruption: false,
        ..Default::default()
    };
    WasmEngine::new(&config).unwrap()
}

fn test_invoker(engine: &WasmEngine, store: Arc<dyn StateStore>) -> Invoker {
    glass_host::create_invoker(engine, ExecutionConfig::default(), store).unwrap()
}

#[tokio::test]
async fn test_pipeline_load_once_invoke_many() {
    let wat = r#"
        (module
            (import "env" "set_state" (func $set_state (param i32 i32 i32)))
            (import "env" "get_state" (func $get_state (param i32 i32) (result i64)))
            (memory (export "memory") 1)
            (data (i32.const 0) "hits")
            (func (export "bump") (result i64)
                (call $set_state (i32.const 0) (i32.const 4)
                    (i32.add
                        (i32.wrap_i64 (call $get_state (i32.const 0) (i32.const 4)))
                        (i32.const 1)))
                (call $get_state (i32.const 0) (i32.const 4))
            )
        )
    "#;

    let engine = test_engine();
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let invoker = test_invoker(&engine, store.clone());
    let loader = ModuleLoader::new();

    for expected in 1..=5u64 {
        let artifact = loader.get_or_load_wat(engine.inner(), wat).await.unwrap();
        let results = invoker.invoke(&artifact, "bump", &[], None).await.unwrap();
        assert_eq!(results, vec![expected]);
    }

    // Five invocations, one compile
    assert_eq!(loader.compile_count(), 1);
    assert_eq!(store.get("hits").await.unwrap(), 5);
}

#[tokio::test]
async fn test_guest_memory_is_not_shared_between_invocations() {
    // The guest scribbles a marker into its own memory and reports what it
    // found there on entry. Every invocation must see zeroed memory,
    // regardless of what the previous instance wrote.
    let wat = r#"
        (module
            (memory (export "memory") 1)
            (func (export "scribble") (result i64)
                (local $found i64)
                (local.set $found (i64.load (i32.const 2048)))
                (i64.store (i32.const 2048) (i64.const 0xDEAD))
                (local.get $found)
            )
        )
    "#;

    let engine = test_engine();
    let invoker = test_invoker(&engine, Arc::new(MemoryStore::new()));
    let artifact = CompiledArtifact::from_wat(engine.inner(), wat).unwrap();

    for _ in 0..3 {
        let results = invoker.invoke(&artifact, "scribble", &[], None).await.unwrap();
        assert_eq!(results, vec![0]);
    }
}

#[tokio::test]
async fn test_guest_exit_zero_is_success() {
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
            (memory (export "memory") 1)
            (func (export "bail_cleanly") (result i64)
                (call $proc_exit (i32.const 0))
                (i64.const 99)
            )
        )
    "#;

    let engine = test_engine();
    let invoker = test_invoker(&engine, Arc::new(MemoryStore::new()));
    let artifact = CompiledArtifact::from_wat(engine.inner(), wat).unwrap();

    // Exit status 0 short-circuits the call; success, no results
    let results = invoker
        .invoke(&artifact, "bail_cleanly", &[], None)
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_guest_nonzero_exit_is_failure() {
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
            (memory (export "memory") 1)
            (func (export "bail_angrily")
                (call $proc_exit (i32.const 3))
            )
        )
    "#;

    let engine = test_engine();
    let invoker = test_invoker(&engine, Arc::new(MemoryStore::new()));
    let artifact = CompiledArtifact::from_wat(engine.inner(), wat).unwrap();

    let err = invoker
        .invoke(&artifact, "bail_angrily", &[], None)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InvocationFailed { .. }));
}

#[tokio::test]
async fn test_state_writes_survive_faulting_invocations() {
    // A trap after a completed state write must not roll the write back;
    // there is no transactional coupling between sandbox and store.
    let wat = r#"
        (module
            (import "env" "set_state" (func $set_state (param i32 i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "written")
            (func (export "write_then_trap")
                (call $set_state (i32.const 0) (i32.const 7) (i32.const 41))
                unreachable
            )
        )
    "#;

    let engine = test_engine();
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let invoker = test_invoker(&engine, store.clone());
    let artifact = CompiledArtifact::from_wat(engine.inner(), wat).unwrap();

    let err = invoker
        .invoke(&artifact, "write_then_trap", &[], None)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InvocationFailed { .. }));
    assert_eq!(store.get("written").await.unwrap(), 41);
}
