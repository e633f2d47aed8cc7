//! Sandbox instance lifecycle management.
//!
//! This module provides [`Invoker`], which handles one complete invocation:
//!
//! 1. Create a fresh store (new, zero-initialized linear memory) with a
//!    unique instance identity
//! 2. Instantiate the shared compiled artifact into it
//! 3. Look up and call the named export with u64 arguments
//! 4. Tear the instance down unconditionally, on every path
//!
//! No two instances ever share linear memory; the shared state store is the
//! only channel between them, and a fault in one invocation never affects
//! another.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use wasmtime::{Linker, Trap, Val, ValType};
use wasmtime_wasi::I32Exit;

use crate::context::{
    InvocationContext, calculate_fuel_consumed, create_store, get_remaining_fuel,
};
use crate::module::CompiledArtifact;
use crate::state::StateStore;
use crate::WasmEngine;
use glass_common::{ExecutionConfig, RuntimeError, StateError};

/// Sandbox invoker.
///
/// Holds everything shared between invocations — the engine, the linker
/// with registered host functions, the execution limits, and the state
/// store handle — and nothing per-invocation. Safe to share behind an
/// `Arc` across concurrent invocations; each call gets its own store.
pub struct Invoker {
    engine: WasmEngine,
    linker: Linker<InvocationContext>,
    exec_config: ExecutionConfig,
    state: Arc<dyn StateStore>,
}

impl Invoker {
    /// Create a new invoker with an empty linker.
    ///
    /// Host functions (the ABI bridge and the WASI shim) are registered by
    /// the host crate through [`linker_mut`](Self::linker_mut).
    pub fn new(
        engine: WasmEngine,
        exec_config: ExecutionConfig,
        state: Arc<dyn StateStore>,
    ) -> Self {
        let linker = Linker::new(engine.inner());

        Self {
            engine,
            linker,
            exec_config,
            state,
        }
    }

    /// Get a mutable reference to the linker, for host function
    /// registration.
    pub fn linker_mut(&mut self) -> &mut Linker<InvocationContext> {
        &mut self.linker
    }

    /// Get the shared state store handle.
    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    /// Get the engine.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Execute one invocation of `function` in a throwaway instance.
    ///
    /// Missing trailing arguments default to `0` (the declared arity is
    /// always honored on the actual call); surplus arguments are an error.
    /// A guest-signaled exit with status 0 is reported as success with an
    /// empty result list.
    ///
    /// # Errors
    ///
    /// - `FunctionNotFound` if the export is absent (checked before any
    ///   call attempt)
    /// - `MemoryBoundsViolation` if guest code handed the bridge an
    ///   out-of-bounds pointer/length
    /// - `State(BackendUnavailable)` if the store failed mid-invocation
    /// - `FuelExhausted` / `ExecutionTimeout` on resource limits
    /// - `InvocationFailed` for traps and nonzero guest exits
    ///
    /// All of these are local to this invocation.
    #[instrument(skip(self, artifact, args), fields(function = %function))]
    pub async fn invoke(
        &self,
        artifact: &CompiledArtifact,
        function: &str,
        args: &[u64],
        instance_id: Option<String>,
    ) -> Result<Vec<u64>, RuntimeError> {
        let instance_id =
            instance_id.unwrap_or_else(|| format!("instance-{}", Uuid::new_v4()));

        let context = InvocationContext::new(instance_id.clone(), self.state.clone());
        let mut store = create_store(&self.engine, &self.exec_config, context)?;
        let initial_fuel = get_remaining_fuel(&store).unwrap_or(0);

        debug!(instance_id = %instance_id, "Instantiating sandbox instance");

        // Fresh instance with its own linear memory; dropping `store` at the
        // end of this function releases it on every path.
        let instance = self
            .linker
            .instantiate_async(&mut store, artifact.module())
            .await
            .map_err(|e| {
                RuntimeError::invocation_failed(format!("instantiation failed: {e}"))
            })?;

        // Export lookup comes before any call attempt
        let Some(func) = instance.get_func(&mut store, function) else {
            warn!(instance_id = %instance_id, "Export not found");
            return Err(RuntimeError::function_not_found(function));
        };

        let ty = func.ty(&store);
        let params = build_params(function, &ty, args)?;
        let mut results = vec![Val::I64(0); ty.results().len()];

        debug!(
            instance_id = %instance_id,
            arity = params.len(),
            "Calling guest function"
        );

        let call_result = func.call_async(&mut store, &params, &mut results).await;

        let fuel_consumed = calculate_fuel_consumed(initial_fuel, &store);
        store.data_mut().metrics.fuel_consumed = fuel_consumed;
        store.data_mut().finalize_metrics();
        let duration = store.data().elapsed();

        match call_result {
            Ok(()) => {
                let values = collect_results(function, &results)?;

                info!(
                    instance_id = %instance_id,
                    duration_ms = duration.as_millis(),
                    fuel_consumed = fuel_consumed,
                    results = values.len(),
                    "Invocation completed"
                );

                Ok(values)
            }
            Err(err) => {
                // WASI exit with status 0 is a successful completion; the
                // guest produced no return values.
                if let Some(exit) = err.downcast_ref::<I32Exit>() {
                    if exit.0 == 0 {
                        info!(
                            instance_id = %instance_id,
                            duration_ms = duration.as_millis(),
                            "Guest exited with status 0"
                        );
                        return Ok(Vec::new());
                    }
                    error!(instance_id = %instance_id, status = exit.0, "Guest exit");
                    return Err(RuntimeError::invocation_failed(format!(
                        "guest exited with status {}",
                        exit.0
                    )));
                }

                let mapped = self.classify_guest_fault(err);
                error!(
                    instance_id = %instance_id,
                    duration_ms = duration.as_millis(),
                    fuel_consumed = fuel_consumed,
                    error = %mapped,
                    "Invocation failed"
                );
                Err(mapped)
            }
        }
    }

    /// Map a wasmtime call error onto the error taxonomy.
    ///
    /// Host-raised faults (bounds violations, store failures) travel inside
    /// the wasmtime error chain and are recovered under their own variants;
    /// everything else is a guest fault.
    fn classify_guest_fault(&self, err: wasmtime::Error) -> RuntimeError {
        if let Some(trap) = err.downcast_ref::<Trap>() {
            if *trap == Trap::OutOfFuel {
                return RuntimeError::FuelExhausted;
            }
            if *trap == Trap::Interrupt {
                return RuntimeError::ExecutionTimeout {
                    duration_ms: self.exec_config.timeout_ms,
                };
            }
        }

        for cause in err.chain() {
            if let Some(runtime_err) = cause.downcast_ref::<RuntimeError>() {
                return runtime_err.clone();
            }
            if let Some(state_err) = cause.downcast_ref::<StateError>() {
                return RuntimeError::State(state_err.clone());
            }
        }

        RuntimeError::invocation_failed(format!("{err:#}"))
    }
}

/// Build the parameter list for a call, honoring the declared arity.
///
/// The host ABI is u64-only; exports with other parameter types are not
/// invocable through this interface.
fn build_params(
    function: &str,
    ty: &wasmtime::FuncType,
    args: &[u64],
) -> Result<Vec<Val>, RuntimeError> {
    let arity = ty.params().len();

    if ty.params().any(|p| !matches!(p, ValType::I64)) {
        return Err(RuntimeError::invocation_failed(format!(
            "'{function}' has a non-u64 parameter; only u64 signatures are invocable"
        )));
    }
    if args.len() > arity {
        return Err(RuntimeError::invocation_failed(format!(
            "'{function}' takes {arity} argument(s), got {}",
            args.len()
        )));
    }

    let mut params: Vec<Val> = args.iter().map(|a| Val::I64(*a as i64)).collect();
    // Missing trailing arguments default to 0
    params.resize(arity, Val::I64(0));
    Ok(params)
}

/// Extract u64 results from a completed call.
fn collect_results(function: &str, results: &[Val]) -> Result<Vec<u64>, RuntimeError> {
    results
        .iter()
        .map(|v| match v {
            Val::I64(x) => Ok(*x as u64),
            other => Err(RuntimeError::invocation_failed(format!(
                "'{function}' returned a non-u64 result: {other:?}"
            ))),
        })
        .collect()
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("exec_config", &self.exec_config)
            .finish_non_exhaustive()
    }
}
