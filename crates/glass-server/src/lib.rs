//! HTTP interface for the glass invocation host.
//!
//! This crate exposes the invocation pipeline over HTTP:
//!
//! - `ANY /invoke/:function` runs one guest export in a fresh sandbox
//! - `GET /health` and `GET /metrics` report node status
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use glass_common::RuntimeConfig;
//! use glass_core::MemoryStore;
//! use glass_server::{GlassServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime_config = RuntimeConfig::default();
//!     let store = Arc::new(MemoryStore::new());
//!
//!     let server = GlassServer::new(
//!         &runtime_config,
//!         ServerConfig::default(),
//!         store,
//!         "node-1",
//!     )?;
//!     server.state().load_guest_wat(glass_host::guest::GUEST_WAT).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod handler;
pub mod response;
pub mod router;
pub mod server;
pub mod state;

pub use server::{GlassServer, ServerConfig, TestHandle};
pub use state::AppState;
