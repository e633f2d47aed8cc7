//! Error types for the glass invocation host.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`StateError`]: Failures of the shared key/value state store
//! - [`RuntimeError`]: Everything else, from module compilation to invocation
//!
//! The propagation policy is asymmetric: [`RuntimeError::InvalidModule`] and
//! a [`StateError::BackendUnavailable`] raised by the startup connectivity
//! check are fatal to process startup, while every error raised during a
//! live invocation is reported to that invocation's caller only and never
//! terminates the host process.

use thiserror::Error;

/// Errors from the shared key/value state store.
///
/// The store never fails for a missing key (absence reads as `0`); the only
/// caller-visible failures are an empty key and an unreachable backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// An empty key was presented to the store.
    #[error("state key must not be empty")]
    InvalidKey,

    /// The persistence backend could not be reached or rejected the operation.
    #[error("state backend unavailable: {reason}")]
    BackendUnavailable {
        /// Description of the backend failure.
        reason: String,
    },
}

impl StateError {
    /// Create a new `BackendUnavailable` error.
    pub fn backend_unavailable(reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            reason: reason.into(),
        }
    }
}

/// Top-level runtime errors.
///
/// These errors cover the lifecycle of the invocation host: compiling the
/// guest module, looking up exports, bridging guest memory, and executing
/// one invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The guest binary was rejected at compile time (malformed binary or
    /// an import outside the host ABI).
    #[error("invalid module: {reason}")]
    InvalidModule {
        /// Description of the compilation failure.
        reason: String,
    },

    /// The requested export is absent from the compiled artifact.
    #[error("function not found: {name}")]
    FunctionNotFound {
        /// Name of the export that was requested.
        name: String,
    },

    /// A guest-supplied pointer/length pair fell outside the instance's
    /// linear memory. Local to one invocation.
    #[error("guest memory access out of bounds: ptr={ptr} len={len} memory_size={memory_size}")]
    MemoryBoundsViolation {
        /// Guest-supplied offset into linear memory.
        ptr: u32,
        /// Guest-supplied length in bytes.
        len: u32,
        /// Size of the instance's linear memory at the time of the access.
        memory_size: usize,
    },

    /// The guest trapped or exited with a nonzero status. Local to one
    /// invocation; a guest exit with status 0 is a success, not this error.
    #[error("invocation failed: {cause}")]
    InvocationFailed {
        /// Description of the guest fault.
        cause: String,
    },

    /// Execution exhausted the configured fuel limit.
    #[error("fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// Execution exceeded the per-invocation deadline.
    #[error("execution timeout after {duration_ms}ms")]
    ExecutionTimeout {
        /// The deadline in milliseconds.
        duration_ms: u64,
    },

    /// A state store operation failed inside an invocation.
    #[error(transparent)]
    State(#[from] StateError),

    /// Invalid configuration was provided.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl RuntimeError {
    /// Create a new `InvalidModule` error.
    pub fn invalid_module(reason: impl Into<String>) -> Self {
        Self::InvalidModule {
            reason: reason.into(),
        }
    }

    /// Create a new `FunctionNotFound` error.
    pub fn function_not_found(name: impl Into<String>) -> Self {
        Self::FunctionNotFound { name: name.into() }
    }

    /// Create a new `InvocationFailed` error.
    pub fn invocation_failed(cause: impl Into<String>) -> Self {
        Self::InvocationFailed {
            cause: cause.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is local to a single invocation and must
    /// never escape to other concurrent invocations or the host process.
    pub fn is_invocation_local(&self) -> bool {
        matches!(
            self,
            Self::FunctionNotFound { .. }
                | Self::MemoryBoundsViolation { .. }
                | Self::InvocationFailed { .. }
                | Self::FuelExhausted
                | Self::ExecutionTimeout { .. }
                | Self::State(_)
        )
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::FuelExhausted | Self::ExecutionTimeout { .. })
    }

    /// Returns `true` if this error indicates the requested export is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FunctionNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::function_not_found("rate_limit");
        assert_eq!(err.to_string(), "function not found: rate_limit");

        let err = StateError::InvalidKey;
        assert_eq!(err.to_string(), "state key must not be empty");

        let err = RuntimeError::MemoryBoundsViolation {
            ptr: 70000,
            len: 16,
            memory_size: 65536,
        };
        assert_eq!(
            err.to_string(),
            "guest memory access out of bounds: ptr=70000 len=16 memory_size=65536"
        );
    }

    #[test]
    fn test_state_error_into_runtime_error() {
        let state_err = StateError::backend_unavailable("connection refused");
        let runtime_err: RuntimeError = state_err.into();

        assert!(matches!(runtime_err, RuntimeError::State(_)));
        assert_eq!(
            runtime_err.to_string(),
            "state backend unavailable: connection refused"
        );
    }

    #[test]
    fn test_is_invocation_local() {
        assert!(RuntimeError::function_not_found("add").is_invocation_local());
        assert!(
            RuntimeError::MemoryBoundsViolation {
                ptr: 0,
                len: 1,
                memory_size: 0
            }
            .is_invocation_local()
        );
        assert!(RuntimeError::invocation_failed("trap").is_invocation_local());
        assert!(!RuntimeError::invalid_module("bad magic").is_invocation_local());
        assert!(!RuntimeError::invalid_config("bad addr").is_invocation_local());
    }

    #[test]
    fn test_is_resource_limit() {
        assert!(RuntimeError::FuelExhausted.is_resource_limit());
        assert!(RuntimeError::ExecutionTimeout { duration_ms: 100 }.is_resource_limit());
        assert!(!RuntimeError::invocation_failed("trap").is_resource_limit());
    }

    #[test]
    fn test_is_not_found() {
        assert!(RuntimeError::function_not_found("missing").is_not_found());
        assert!(!RuntimeError::FuelExhausted.is_not_found());
    }
}
