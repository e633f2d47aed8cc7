//! Host function registration for the Wasmtime linker.
//!
//! This is the ABI bridge: exactly two host functions, `env::set_state` and
//! `env::get_state`, through which guest code reads and mutates the shared
//! state store. The bridge carries no state of its own — it is a pure
//! translation layer registered once on a linker shared by all sandbox
//! instances.
//!
//! # Memory Protocol
//!
//! The guest passes a `(key_ptr, key_len)` pair into its own linear memory.
//! The bridge validates the range against the current memory bounds before
//! reading; a violation traps only the current invocation, never the host
//! process. Key bytes are treated as opaque (decoded lossily, never
//! rejected).
//!
//! # Width Contract
//!
//! `set_state` carries a 32-bit value on the wire and the store holds
//! 64-bit values, so writes above 2^32-1 are irrecoverably truncated by the
//! guest before they reach the host. `get_state` returns the full 64-bit
//! stored value. This asymmetry is an ABI contract, preserved deliberately.

use anyhow::anyhow;
use tracing::{trace, warn};
use wasmtime::{Caller, Extern, Linker};

use glass_common::RuntimeError;
use glass_core::InvocationContext;

/// Name of the linear memory export every guest must provide.
const GUEST_MEMORY_EXPORT: &str = "memory";

/// Register the full host side of the guest ABI:
/// the two `env` state functions plus the WASI preview1 shim.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(linker: &mut Linker<InvocationContext>) -> Result<(), RuntimeError> {
    register_state_functions(linker)?;
    register_wasi_shim(linker)?;
    Ok(())
}

/// Register `env::set_state` and `env::get_state`.
///
/// - `set_state(key_ptr: u32, key_len: u32, value: u32)` — overwrite the
///   value for the key read from guest memory (value widened from 32 bits)
/// - `get_state(key_ptr: u32, key_len: u32) -> u64` — read the full 64-bit
///   value for the key, `0` if absent
pub fn register_state_functions(
    linker: &mut Linker<InvocationContext>,
) -> Result<(), RuntimeError> {
    linker
        .func_wrap_async(
            "env",
            "set_state",
            |mut caller: Caller<'_, InvocationContext>,
             (key_ptr, key_len, value): (u32, u32, u32)| {
                Box::new(async move {
                    let key = read_guest_key(&mut caller, key_ptr, key_len)?;
                    let state = caller.data().state().clone();

                    // The wire value is 32-bit by contract; widen for storage
                    state.set(&key, u64::from(value)).await?;

                    trace!(
                        instance_id = %caller.data().instance_id,
                        key = %key,
                        value = value,
                        "Guest state write"
                    );
                    Ok(())
                })
            },
        )
        .map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to register set_state: {e}"))
        })?;

    linker
        .func_wrap_async(
            "env",
            "get_state",
            |mut caller: Caller<'_, InvocationContext>, (key_ptr, key_len): (u32, u32)| {
                Box::new(async move {
                    let key = read_guest_key(&mut caller, key_ptr, key_len)?;
                    let state = caller.data().state().clone();

                    let value = state.get(&key).await?;

                    trace!(
                        instance_id = %caller.data().instance_id,
                        key = %key,
                        value = value,
                        "Guest state read"
                    );
                    Ok(value)
                })
            },
        )
        .map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to register get_state: {e}"))
        })?;

    Ok(())
}

/// Register the WASI preview1 shim.
///
/// The host does not implement system-call emulation itself; guests built
/// with WASI toolchains (and the built-in guest's clock access) go through
/// `wasmtime-wasi`.
pub fn register_wasi_shim(linker: &mut Linker<InvocationContext>) -> Result<(), RuntimeError> {
    wasmtime_wasi::preview1::add_to_linker_async(linker, |ctx: &mut InvocationContext| {
        ctx.wasi_mut()
    })
    .map_err(|e| RuntimeError::invalid_config(format!("Failed to register WASI shim: {e}")))
}

/// Read a key out of guest linear memory after validating bounds.
///
/// This is the one place memory-safety violations can originate from
/// untrusted input: guest-supplied offsets are never dereferenced without
/// an explicit range check against the current memory length.
fn read_guest_key(
    caller: &mut Caller<'_, InvocationContext>,
    key_ptr: u32,
    key_len: u32,
) -> anyhow::Result<String> {
    let memory = caller
        .get_export(GUEST_MEMORY_EXPORT)
        .and_then(Extern::into_memory)
        .ok_or_else(|| anyhow!("guest module does not export '{GUEST_MEMORY_EXPORT}'"))?;

    let data = memory.data(&caller);
    let start = key_ptr as usize;
    let end = start.checked_add(key_len as usize);

    match end {
        Some(end) if end <= data.len() => {
            // Keys are opaque byte strings; invalid UTF-8 is replaced,
            // never rejected
            Ok(String::from_utf8_lossy(&data[start..end]).into_owned())
        }
        _ => {
            warn!(
                instance_id = %caller.data().instance_id,
                key_ptr = key_ptr,
                key_len = key_len,
                memory_size = data.len(),
                "Guest memory access out of bounds"
            );
            Err(anyhow::Error::new(RuntimeError::MemoryBoundsViolation {
                ptr: key_ptr,
                len: key_len,
                memory_size: data.len(),
            }))
        }
    }
}
