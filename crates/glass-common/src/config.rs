//! Configuration structures for the glass invocation host.
//!
//! This module defines configuration options for the runtime components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, interruption)
//! - [`ExecutionConfig`]: Per-invocation limits (fuel, timeout)
//! - [`StoreConfig`]: State store backend selection and connection settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the invocation
/// host. It can be loaded from a TOML file or assembled from CLI flags.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-invocation execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// State store backend configuration.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect the global Wasmtime engine behavior, including
/// the memory allocation strategy for sandbox instances.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for high-performance instance creation.
    ///
    /// When enabled, memory is pre-allocated for a pool of instances,
    /// keeping the per-invocation cold start cheap.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    ///
    /// This determines the maximum linear memory each instance can use.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable epoch-based interruption.
    ///
    /// This allows aborting a running invocation once its deadline passes.
    /// Requires an epoch ticker to be running (see `WasmEngine`).
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            epoch_interruption: defaults::epoch_interruption(),
        }
    }
}

/// Per-invocation execution configuration.
///
/// These settings control resource limits for a single sandbox instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum fuel (CPU instructions) per invocation.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Per-invocation deadline in milliseconds.
    ///
    /// Enforced via epoch interruption when the engine enables it.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Enable fuel metering.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            timeout_ms: defaults::timeout_ms(),
            fuel_metering: defaults::fuel_metering(),
        }
    }
}

impl ExecutionConfig {
    /// Get the deadline as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// State store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process map behind a single mutex. No persistence.
    #[default]
    Memory,
    /// External Redis service. Values persist across restarts and are
    /// shared between nodes.
    Redis,
}

/// State store configuration.
///
/// The store is the single source of truth shared across all concurrent
/// invocations; these settings pick and parameterize its backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Which backend to use.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis server address (`host:port`).
    #[serde(default = "defaults::redis_addr")]
    pub redis_addr: String,

    /// Redis logical database index.
    #[serde(default)]
    pub redis_db: i64,

    /// Startup connectivity check timeout in milliseconds.
    ///
    /// The Redis backend pings the server at construction and fails fast
    /// if it does not answer within this bound.
    #[serde(default = "defaults::connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_addr: defaults::redis_addr(),
            redis_db: 0,
            connect_timeout_ms: defaults::connect_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Get the startup connectivity timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        true
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn epoch_interruption() -> bool {
        true
    }

    pub const fn max_fuel() -> u64 {
        10_000_000
    }

    pub const fn timeout_ms() -> u64 {
        100
    }

    pub const fn fuel_metering() -> bool {
        true
    }

    pub fn redis_addr() -> String {
        "127.0.0.1:6379".to_string()
    }

    pub const fn connect_timeout_ms() -> u64 {
        5000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert!(config.engine.pooling_allocator);
        assert_eq!(config.engine.max_instances, 1000);
        assert_eq!(config.engine.instance_memory_mb, 64);
        assert!(config.engine.epoch_interruption);

        assert_eq!(config.execution.max_fuel, 10_000_000);
        assert_eq!(config.execution.timeout_ms, 100);
        assert!(config.execution.fuel_metering);

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.redis_addr, "127.0.0.1:6379");
        assert_eq!(config.store.redis_db, 0);
        assert_eq!(config.store.connect_timeout_ms, 5000);
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            config.engine.max_instances,
            deserialized.engine.max_instances
        );
        assert_eq!(config.execution.max_fuel, deserialized.execution.max_fuel);
        assert_eq!(config.store.backend, deserialized.store.backend);
    }

    #[test]
    fn test_execution_timeout() {
        let config = ExecutionConfig {
            timeout_ms: 500,
            ..Default::default()
        };

        assert_eq!(config.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_store_backend_names() {
        let json = r#"{"store": {"backend": "redis", "redis_addr": "10.0.0.5:6379", "redis_db": 2}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis_addr, "10.0.0.5:6379");
        assert_eq!(config.store.redis_db, 2);
        // Default applied for unspecified field
        assert_eq!(config.store.connect_timeout_ms, 5000);
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"engine": {"max_instances": 500}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.engine.max_instances, 500);
        assert!(config.engine.pooling_allocator);
        assert_eq!(config.execution.max_fuel, 10_000_000);
    }
}
