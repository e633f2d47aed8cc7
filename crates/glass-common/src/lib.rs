//! Common types, errors, and utilities for the glass invocation host.
//!
//! This crate provides shared functionality used across the glass workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for runtime, store, and server settings
//! - TOML configuration file loading

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{EngineConfig, ExecutionConfig, RuntimeConfig, StoreBackend, StoreConfig};
pub use config_file::{ConfigFile, ConfigFileError, ServerConfigFile};
pub use error::{RuntimeError, StateError};
