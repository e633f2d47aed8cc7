//! Shared key/value state store.
//!
//! The store is the single source of truth shared across all concurrent
//! invocations: keys are opaque namespaced strings, values are unsigned
//! 64-bit integers, and a missing key always reads as `0`.
//!
//! Two backends implement [`StateStore`]:
//! - [`MemoryStore`]: an in-process map behind a single mutex, adequate at
//!   moderate concurrency and used by default
//! - [`RedisStore`]: an external Redis service, using Redis's native
//!   `INCRBY` for the atomic increment and plain GET/SET for the rest
//!
//! `increment` is the only operation that is a true atomic
//! read-modify-write; a `get` followed by a `set` is a logical race
//! whenever two invocations target the same key concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use tracing::{debug, info};

use glass_common::{StateError, StoreBackend, StoreConfig};

/// Keyed store of unsigned 64-bit values shared by all invocations.
///
/// Implementations must be safe to share behind an `Arc` across concurrent
/// invocations. Beyond the per-key atomicity of [`increment`], the store
/// provides no transactional isolation: every mutation is observable by
/// every other invocation's subsequent read.
///
/// [`increment`]: StateStore::increment
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Get the value for `key`, or `0` if the key was never written.
    async fn get(&self, key: &str) -> Result<u64, StateError>;

    /// Unconditionally overwrite the value for `key`.
    async fn set(&self, key: &str, value: u64) -> Result<(), StateError>;

    /// Check whether `key` has been written.
    async fn exists(&self, key: &str) -> Result<bool, StateError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StateError>;

    /// Atomically add `delta` (may be negative) and return the new value.
    ///
    /// This is a single indivisible backend operation, never get-then-set,
    /// and is therefore the only store operation safe for read-modify-write
    /// under concurrent callers.
    async fn increment(&self, key: &str, delta: i64) -> Result<u64, StateError>;
}

/// Reject the one key shape the store never accepts.
fn validate_key(key: &str) -> Result<(), StateError> {
    if key.is_empty() {
        return Err(StateError::InvalidKey);
    }
    Ok(())
}

/// In-process store backend.
///
/// A single mutex guards the whole key space; only the atomic operations of
/// [`StateStore`] are exposed, so callers cannot bypass the lock.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, u64>>,
}

impl MemoryStore {
    /// Create a new, empty in-process store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<u64, StateError> {
        validate_key(key)?;
        Ok(self.entries.lock().get(key).copied().unwrap_or(0))
    }

    async fn set(&self, key: &str, value: u64) -> Result<(), StateError> {
        validate_key(key)?;
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StateError> {
        validate_key(key)?;
        Ok(self.entries.lock().contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        validate_key(key)?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<u64, StateError> {
        validate_key(key)?;
        let mut entries = self.entries.lock();
        let slot = entries.entry(key.to_string()).or_insert(0);
        // Two's-complement add, matching Redis INCRBY on a 64-bit value
        *slot = slot.wrapping_add(delta as u64);
        Ok(*slot)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

/// Redis store backend.
///
/// Values are stored as decimal text (Redis-native integer encoding);
/// `increment` maps to `INCRBY`, Redis's atomic increment primitive. The
/// constructor pings the server with a bounded timeout so an unreachable
/// backend fails process startup fast instead of on the first invocation.
pub struct RedisStore {
    connection: redis::aio::ConnectionManager,
    addr: String,
}

impl RedisStore {
    /// Connect to Redis and verify reachability.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the connection cannot be established
    /// or the server does not answer a PING within the configured timeout.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StateError> {
        let url = format!("redis://{}/{}", config.redis_addr, config.redis_db);
        let client = redis::Client::open(url)
            .map_err(|e| StateError::backend_unavailable(format!("invalid redis address: {e}")))?;

        let mut connection = tokio::time::timeout(
            config.connect_timeout(),
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| {
            StateError::backend_unavailable(format!(
                "timed out connecting to redis at {}",
                config.redis_addr
            ))
        })?
        .map_err(|e| {
            StateError::backend_unavailable(format!(
                "failed to connect to redis at {}: {e}",
                config.redis_addr
            ))
        })?;

        let pong: String = tokio::time::timeout(
            config.connect_timeout(),
            redis::cmd("PING").query_async(&mut connection),
        )
        .await
        .map_err(|_| {
            StateError::backend_unavailable(format!(
                "redis at {} did not answer PING in time",
                config.redis_addr
            ))
        })?
        .map_err(|e| StateError::backend_unavailable(format!("redis PING failed: {e}")))?;

        debug!(addr = %config.redis_addr, response = %pong, "Redis connectivity verified");

        Ok(Self {
            connection,
            addr: config.redis_addr.clone(),
        })
    }

    fn backend_err(e: redis::RedisError) -> StateError {
        StateError::backend_unavailable(e.to_string())
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<u64, StateError> {
        validate_key(key)?;
        let mut conn = self.connection.clone();
        let value: Option<u64> = conn.get(key).await.map_err(Self::backend_err)?;
        Ok(value.unwrap_or(0))
    }

    async fn set(&self, key: &str, value: u64) -> Result<(), StateError> {
        validate_key(key)?;
        let mut conn = self.connection.clone();
        let _: () = conn.set(key, value).await.map_err(Self::backend_err)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StateError> {
        validate_key(key)?;
        let mut conn = self.connection.clone();
        conn.exists(key).await.map_err(Self::backend_err)
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        validate_key(key)?;
        let mut conn = self.connection.clone();
        let _: () = conn.del(key).await.map_err(Self::backend_err)?;
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<u64, StateError> {
        validate_key(key)?;
        let mut conn = self.connection.clone();
        let value: i64 = conn.incr(key, delta).await.map_err(Self::backend_err)?;
        Ok(value as u64)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

/// Build the configured store backend.
///
/// # Errors
///
/// Returns `BackendUnavailable` if the Redis backend is selected and the
/// server cannot be reached; this is fatal at process startup.
pub async fn build_state_store(config: &StoreConfig) -> Result<Arc<dyn StateStore>, StateError> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-process state store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            info!(addr = %config.redis_addr, db = config.redis_db, "Using Redis state store");
            Ok(Arc::new(RedisStore::connect(config).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_unwritten_key_is_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.get("never_written").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        store.set("counter", 42).await.unwrap();
        assert_eq!(store.get("counter").await.unwrap(), 42);

        // Unconditional overwrite
        store.set("counter", 7).await.unwrap();
        assert_eq!(store.get("counter").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_empty_key_rejected_everywhere() {
        let store = MemoryStore::new();

        assert_eq!(store.get("").await, Err(StateError::InvalidKey));
        assert_eq!(store.set("", 1).await, Err(StateError::InvalidKey));
        assert_eq!(store.exists("").await, Err(StateError::InvalidKey));
        assert_eq!(store.delete("").await, Err(StateError::InvalidKey));
        assert_eq!(store.increment("", 1).await, Err(StateError::InvalidKey));
    }

    #[tokio::test]
    async fn test_exists_and_delete() {
        let store = MemoryStore::new();

        assert!(!store.exists("session:99").await.unwrap());
        store.set("session:99", 12345).await.unwrap();
        assert!(store.exists("session:99").await.unwrap());

        store.delete("session:99").await.unwrap();
        assert!(!store.exists("session:99").await.unwrap());
        assert_eq!(store.get("session:99").await.unwrap(), 0);

        // Deleting an absent key is fine
        store.delete("session:99").await.unwrap();
    }

    #[tokio::test]
    async fn test_increment_from_absent_key() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("hits", 5).await.unwrap(), 5);
        assert_eq!(store.increment("hits", 5).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_increment_negative_delta() {
        let store = MemoryStore::new();
        store.set("budget", 10).await.unwrap();
        assert_eq!(store.increment("budget", -3).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_concurrent_increments_commute() {
        let store = Arc::new(MemoryStore::new());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.increment("contended", 3).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Order-independent: final value equals a single increment of the sum
        assert_eq!(store.get("contended").await.unwrap(), 8 * 100 * 3);
    }

    #[tokio::test]
    async fn test_build_memory_store() {
        let config = StoreConfig::default();
        let store = build_state_store(&config).await.unwrap();
        store.set("k", 1).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_build_redis_store_unreachable_fails_fast() {
        // Port 1 is never a Redis server; the bounded connect must fail,
        // not hang.
        let config = StoreConfig {
            backend: StoreBackend::Redis,
            redis_addr: "127.0.0.1:1".to_string(),
            redis_db: 0,
            connect_timeout_ms: 500,
        };

        let result = build_state_store(&config).await;
        assert!(matches!(
            result.unwrap_err(),
            StateError::BackendUnavailable { .. }
        ));
    }
}
