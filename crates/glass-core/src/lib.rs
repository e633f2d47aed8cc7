//! Core runtime for the glass invocation host.
//!
//! This crate provides the fundamental pieces of the sandboxed invocation
//! pipeline:
//! - [`WasmEngine`]: Configured Wasmtime engine with pooling allocator
//! - [`StateStore`]: Shared key/value store (in-process or Redis)
//! - [`CompiledArtifact`] / [`ModuleLoader`]: Compile-once guest module
//! - [`InvocationContext`]: Per-invocation execution context
//! - [`Invoker`]: Instance-per-invocation execution
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared across all invocations, thread-safe)           │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │              ModuleLoader → CompiledArtifact            │
//! │  (Compiled exactly once, shared read-only)              │
//! └─────────────────────────────────────────────────────────┘
//!                            │  fan-out, one per invocation
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │           Store<InvocationContext> + Instance           │
//! │  (Per-invocation, isolated linear memory, disposable)   │
//! └──────────────────────────┬──────────────────────────────┘
//!                            │  host ABI (set_state/get_state)
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                      StateStore                         │
//! │  (The only shared mutable resource)                     │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod engine;
pub mod module;
pub mod sandbox;
pub mod state;

pub use context::{ExecutionMetrics, InvocationContext};
pub use engine::WasmEngine;
pub use module::{CompiledArtifact, ModuleLoader};
pub use sandbox::Invoker;
pub use state::{MemoryStore, RedisStore, StateStore, build_state_store};
