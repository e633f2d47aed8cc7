//! Host-side ABI surface for the glass invocation host.
//!
//! This crate owns the boundary between guest and host:
//! - [`linker`]: registration of the two `env` state functions and the
//!   WASI preview1 shim, including guest-memory bounds validation
//! - [`guest`]: the embedded built-in guest program exercising the ABI
//!
//! The core crate knows nothing about which host functions exist; it
//! executes whatever the linker carries. This crate is where the ABI is
//! actually defined.

pub mod guest;
pub mod linker;

use std::sync::Arc;

use glass_common::{ExecutionConfig, RuntimeError};
use glass_core::{Invoker, StateStore, WasmEngine};

/// Build a ready-to-use [`Invoker`]: core invoker plus the full host ABI
/// registered on its linker.
///
/// # Errors
///
/// Returns an error if host function registration fails.
pub fn create_invoker(
    engine: &WasmEngine,
    exec_config: ExecutionConfig,
    state: Arc<dyn StateStore>,
) -> Result<Invoker, RuntimeError> {
    let mut invoker = Invoker::new(engine.clone(), exec_config, state);
    linker::register_all(invoker.linker_mut())?;
    Ok(invoker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glass_common::EngineConfig;
    use glass_core::MemoryStore;

    #[test]
    fn test_create_invoker() {
        let config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config).unwrap();
        let invoker =
            create_invoker(&engine, ExecutionConfig::default(), Arc::new(MemoryStore::new()));
        assert!(invoker.is_ok());
    }
}
