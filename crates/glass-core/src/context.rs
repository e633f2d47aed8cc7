//! Per-invocation execution context and store management.
//!
//! This module provides:
//! - [`InvocationContext`]: per-invocation state accessible from host
//!   functions via [`wasmtime::Caller`]
//! - [`create_store`]: one fresh, isolated [`Store`] per invocation
//!
//! A context is created for each invocation and destroyed unconditionally
//! when the invocation ends; the only thing it shares with other
//! invocations is the `Arc<dyn StateStore>` handle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use wasmtime::Store;
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use crate::state::StateStore;
use glass_common::{ExecutionConfig, RuntimeError};

/// Per-invocation execution context.
///
/// Host functions reach the shared state store and the instance identity
/// through this struct; everything else in it is disposable per-invocation
/// bookkeeping.
pub struct InvocationContext {
    /// WASI context for the system-call emulation shim.
    wasi: WasiP1Ctx,

    /// Shared state store, the only channel between instances.
    state: Arc<dyn StateStore>,

    /// Identity of this sandbox instance, for diagnostics
    /// (e.g. `"client-3"` or an auto-generated UUID).
    pub instance_id: String,

    /// Execution metrics.
    pub metrics: ExecutionMetrics,

    /// Invocation start time.
    start_time: Instant,
}

/// Execution performance metrics for one invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Fuel consumed during execution.
    pub fuel_consumed: u64,

    /// Total execution duration.
    pub duration: Option<Duration>,
}

impl InvocationContext {
    /// Create a new invocation context.
    pub fn new(instance_id: String, state: Arc<dyn StateStore>) -> Self {
        // Minimal WASI surface: guests only get stdout/stderr passthrough
        let wasi = WasiCtxBuilder::new()
            .inherit_stdout()
            .inherit_stderr()
            .build_p1();

        Self {
            wasi,
            state,
            instance_id,
            metrics: ExecutionMetrics::default(),
            start_time: Instant::now(),
        }
    }

    /// Get the shared state store handle.
    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    /// Get a mutable reference to the WASI context, for shim registration.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Get elapsed time since the invocation started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Finalize metrics after execution.
    pub fn finalize_metrics(&mut self) {
        self.metrics.duration = Some(self.start_time.elapsed());
    }
}

/// Create a new Wasmtime store for one invocation.
///
/// The store owns a fresh, zero-initialized linear memory region distinct
/// from every other live instance; dropping it releases all instance
/// resources.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    context: InvocationContext,
) -> Result<Store<InvocationContext>, RuntimeError> {
    let mut store = Store::new(engine.inner(), context);

    // The engine enables fuel consumption unconditionally, so a store
    // always needs fuel to run; an unmetered store gets an effectively
    // unlimited tank instead of the limit.
    let fuel = if config.fuel_metering {
        config.max_fuel
    } else {
        u64::MAX
    };
    store
        .set_fuel(fuel)
        .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;

    // Per-invocation deadline, in epoch ticks (one tick per millisecond
    // from the engine's epoch ticker)
    if engine.config().epoch_interruption {
        store.set_epoch_deadline(config.timeout_ms);
    }

    Ok(store)
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<InvocationContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<InvocationContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStore;
    use glass_common::EngineConfig;

    fn test_context(id: &str) -> InvocationContext {
        InvocationContext::new(id.to_string(), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_context_creation() {
        let ctx = test_context("client-1");

        assert_eq!(ctx.instance_id, "client-1");
        assert_eq!(ctx.metrics.fuel_consumed, 0);
        assert!(ctx.metrics.duration.is_none());
    }

    #[test]
    fn test_store_creation() {
        let engine_config = EngineConfig {
            pooling_allocator: false, // Disable for simpler test
            ..Default::default()
        };
        let engine = WasmEngine::new(&engine_config).unwrap();
        let exec_config = ExecutionConfig::default();

        let store = create_store(&engine, &exec_config, test_context("test-123"));
        assert!(store.is_ok());
    }

    #[test]
    fn test_store_fuel() {
        let engine_config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        let engine = WasmEngine::new(&engine_config).unwrap();
        let exec_config = ExecutionConfig {
            max_fuel: 1000,
            fuel_metering: true,
            ..Default::default()
        };

        let store = create_store(&engine, &exec_config, test_context("test")).unwrap();
        let remaining = get_remaining_fuel(&store);

        assert_eq!(remaining, Some(1000));
    }

    #[test]
    fn test_store_fuel_with_metering_disabled() {
        let engine_config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        let engine = WasmEngine::new(&engine_config).unwrap();
        let exec_config = ExecutionConfig {
            fuel_metering: false,
            ..Default::default()
        };

        // Unmetered stores still need fuel because the engine always
        // consumes it
        let store = create_store(&engine, &exec_config, test_context("test")).unwrap();
        assert_eq!(get_remaining_fuel(&store), Some(u64::MAX));
    }
}
