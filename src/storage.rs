//! The storage facade.

use crate::backend::{BackendAdapter, CacheAction, CacheAdapter, DatabaseAdapter};
use crate::builder::StorageBuilder;
use crate::connection::{build_slots, CacheFactory, ConnectionRegistry, DatabaseFactory, DriverRegistry};
use crate::error::{catch_error, Error, Result};
use crate::orchestrator::Orchestrator;
use crate::query::QueryRegistry;
use crate::settings::{into_object, validate_queries, validate_settings};
use crate::strategy::ReadPolicy;
use crate::transaction::TransactionCoordinator;
use crate::Params;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;

/// Lifecycle of a [`Storage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
    Initial,
    Waiting,
    Ready,
    Failed,
}

impl fmt::Display for StorageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageState::Initial => write!(f, "initial"),
            StorageState::Waiting => write!(f, "waiting"),
            StorageState::Ready => write!(f, "ready"),
            StorageState::Failed => write!(f, "failed"),
        }
    }
}

/// Named queries and connections behind one object.
///
/// A `Storage` owns its settings, query registry and connection slots.
/// Several independent instances can live side by side.
///
/// Registration (`init`, `add_settings`, `add_queries`) is serialised by an
/// internal lock. Reads and writes may run concurrently with each other and
/// with registration; a read racing a settings change sees either the old
/// or the new slot for its connection.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use storage_kit::Storage;
///
/// # async fn run() -> storage_kit::Result<()> {
/// let storage = Storage::new();
/// storage
///     .init(
///         json!({"driver": "memory", "connection": {}, "cache": {"driver": "memory"}}),
///         json!({"users": {"sql": "SELECT * FROM users", "caching": true}}),
///     )
///     .await?;
///
/// let users = storage.get_data("users", &Default::default()).await?;
/// assert_eq!(users, None);
/// # Ok(())
/// # }
/// ```
pub struct Storage {
    drivers: DriverRegistry,
    default_connection: String,
    settings: AsyncMutex<Map<String, Value>>,
    queries: QueryRegistry,
    connections: ConnectionRegistry,
    state: Mutex<StorageState>,
    ready: AtomicBool,
}

impl Storage {
    /// Storage with every compiled-in driver and `"main"` as the default
    /// connection.
    pub fn new() -> Self {
        StorageBuilder::new().build()
    }

    pub fn builder() -> StorageBuilder {
        StorageBuilder::new()
    }

    pub(crate) fn from_parts(drivers: DriverRegistry, default_connection: String) -> Self {
        Storage {
            drivers,
            default_connection,
            settings: AsyncMutex::new(Map::new()),
            queries: QueryRegistry::new(),
            connections: ConnectionRegistry::new(),
            state: Mutex::new(StorageState::Initial),
            ready: AtomicBool::new(false),
        }
    }

    /// Apply settings, then queries.
    ///
    /// Returns the readiness flag: `true` when the merged settings hold at
    /// least one key. On failure the state becomes `Failed`; whatever was
    /// merged before the failing step stays merged.
    pub async fn init(&self, settings: Value, queries: Value) -> Result<bool> {
        let result = self.init_inner(settings, queries).await;
        catch_error("init", result)
    }

    /// [`init`](Self::init) from JSON text.
    pub async fn init_from_json(&self, settings: &str, queries: &str) -> Result<bool> {
        let parsed = serde_json::from_str::<Value>(settings)
            .and_then(|s| serde_json::from_str::<Value>(queries).map(|q| (s, q)));

        match parsed {
            Ok((settings, queries)) => self.init(settings, queries).await,
            Err(e) => {
                self.set_state(StorageState::Failed);
                catch_error("init_from_json", Err(Error::from(e)))
            }
        }
    }

    async fn init_inner(&self, settings: Value, queries: Value) -> Result<bool> {
        let mut merged = self.settings.lock().await;
        self.ready.store(false, Ordering::SeqCst);
        self.set_state(StorageState::Waiting);

        let applied = match self.apply_settings(&mut merged, settings) {
            Ok(()) => self.apply_queries(queries),
            Err(e) => Err(e),
        };

        match applied {
            Ok(()) => {
                let ready = !merged.is_empty();
                self.ready.store(ready, Ordering::SeqCst);
                self.set_state(StorageState::Ready);
                info!(
                    "✓ Storage ready: {} (connections: {}, queries: {})",
                    ready,
                    self.connections.len(),
                    self.queries.len()
                );
                Ok(ready)
            }
            Err(e) => {
                self.set_state(StorageState::Failed);
                Err(e)
            }
        }
    }

    /// Validate `settings`, merge them into the held settings and rebuild
    /// every connection slot from the result.
    ///
    /// Slots are built before anything is committed, so a failure leaves
    /// both the settings and the live connections untouched.
    pub async fn add_settings(&self, settings: Value) -> Result<()> {
        let mut merged = self.settings.lock().await;
        let result = self.apply_settings(&mut merged, settings);
        catch_error("add_settings", result)
    }

    /// Validate `queries` and merge them into the registry; same-named
    /// queries are overwritten.
    pub async fn add_queries(&self, queries: Value) -> Result<()> {
        let _guard = self.settings.lock().await;
        let result = self.apply_queries(queries);
        catch_error("add_queries", result)
    }

    fn apply_settings(&self, merged: &mut Map<String, Value>, settings: Value) -> Result<()> {
        let settings = into_object(settings, "Settings")?;
        if settings.is_empty() {
            return Ok(());
        }

        let mut candidate = merged.clone();
        candidate.extend(settings);

        let shape = validate_settings(&candidate)?;
        let slots = build_slots(&shape, &self.drivers, &self.default_connection)?;

        self.connections.replace_all(slots);
        *merged = candidate;
        debug!("✓ Settings applied: {:?}", self.connections.names());
        Ok(())
    }

    fn apply_queries(&self, queries: Value) -> Result<()> {
        let queries = into_object(queries, "Queries")?;
        let validated = validate_queries(&queries)?;
        let count = validated.len();
        self.queries.merge(validated);
        debug!("✓ {} queries registered", count);
        Ok(())
    }

    /// Unconstructed database driver registered under `name`.
    pub fn get_driver(&self, name: &str) -> Option<DatabaseFactory> {
        self.drivers.database(name)
    }

    /// Unconstructed cache driver registered under `name`.
    pub fn get_cache_driver(&self, name: &str) -> Option<CacheFactory> {
        self.drivers.cache(name)
    }

    /// Live database adapter of a connection (the default one for `None`).
    pub fn get_db_connection(&self, connection: Option<&str>) -> Option<Arc<dyn DatabaseAdapter>> {
        let name = connection.unwrap_or(&self.default_connection);
        self.connections
            .get(name)
            .and_then(|slot| slot.database().cloned())
    }

    /// Live cache adapter of a connection (the default one for `None`).
    pub fn get_cache_connection(&self, connection: Option<&str>) -> Option<Arc<dyn CacheAdapter>> {
        let name = connection.unwrap_or(&self.default_connection);
        self.connections
            .get(name)
            .and_then(|slot| slot.cache().cloned())
    }

    /// Cache-aside read of a named query.
    pub async fn get_data(&self, query_name: &str, params: &Params) -> Result<Option<Value>> {
        let result = self
            .orchestrator()
            .read(query_name, params, ReadPolicy::CacheAside)
            .await;
        catch_error("get_data", result)
    }

    /// Read a named query from the database only.
    pub async fn get_from_db(&self, query_name: &str, params: &Params) -> Result<Option<Value>> {
        let result = self
            .orchestrator()
            .read(query_name, params, ReadPolicy::DatabaseOnly)
            .await;
        catch_error("get_from_db", result)
    }

    /// Run a named query as a database write.
    pub async fn set_to_db(&self, query_name: &str, params: &Params) -> Result<Option<Value>> {
        let result = self.orchestrator().write(query_name, params).await;
        catch_error("set_to_db", result)
    }

    /// Read a literal cache key.
    pub async fn get_from_cache(&self, connection: Option<&str>, key: &str) -> Result<Option<Value>> {
        let result = self.orchestrator().cache_get(connection, key).await;
        catch_error("get_from_cache", result)
    }

    /// Write a literal cache key; `expire` is in seconds, `0` for none.
    pub async fn set_to_cache(
        &self,
        connection: Option<&str>,
        key: &str,
        value: &Value,
        expire: u64,
    ) -> Result<()> {
        let result = self
            .orchestrator()
            .cache_set(connection, key, value, expire)
            .await;
        catch_error("set_to_cache", result)
    }

    /// Run named queries as one database transaction.
    pub async fn transaction_to_db<S>(
        &self,
        query_names: &[S],
        params: &[Params],
    ) -> Result<Vec<Option<Value>>>
    where
        S: AsRef<str> + Sync,
    {
        let result = self.coordinator().to_db(query_names, params).await;
        catch_error("transaction_to_db", result)
    }

    /// Run a positional batch of cache actions.
    pub async fn transaction_to_cache(
        &self,
        connection: Option<&str>,
        actions: &[CacheAction],
        keys: &[String],
        values: &[Value],
        expirations: &[u64],
    ) -> Result<Vec<Option<Value>>> {
        let result = self
            .coordinator()
            .to_cache(connection, actions, keys, values, expirations)
            .await;
        catch_error("transaction_to_cache", result)
    }

    /// Read a named query from the database and overwrite its cache entry.
    pub async fn reload_from_db_to_cache(
        &self,
        query_name: &str,
        params: &Params,
    ) -> Result<Option<Value>> {
        let result = self
            .orchestrator()
            .read(query_name, params, ReadPolicy::Reload)
            .await;
        catch_error("reload_from_db_to_cache", result)
    }

    /// Health of every connection: healthy when each of its adapters
    /// answers its health check.
    pub async fn health_check(&self) -> BTreeMap<String, bool> {
        let mut report = BTreeMap::new();
        for name in self.connections.names() {
            let Some(slot) = self.connections.get(&name) else {
                continue;
            };

            let mut healthy = true;
            if let Some(database) = slot.database() {
                healthy &= database.health_check().await.unwrap_or_else(|e| {
                    warn!("✗ Database health check failed on {}: {}", name, e);
                    false
                });
            }
            if let Some(cache) = slot.cache() {
                healthy &= cache.health_check().await.unwrap_or_else(|e| {
                    warn!("✗ Cache health check failed on {}: {}", name, e);
                    false
                });
            }
            report.insert(name, healthy);
        }
        report
    }

    /// Close every adapter and forget all settings.
    ///
    /// Queries stay registered; a later `init` or `add_settings` brings
    /// connections back. Every slot is closed even when one fails, and the
    /// first failure is returned.
    pub async fn close(&self) -> Result<()> {
        let mut merged = self.settings.lock().await;
        merged.clear();
        self.ready.store(false, Ordering::SeqCst);
        self.set_state(StorageState::Initial);

        let mut first_error = None;
        for (name, slot) in self.connections.drain() {
            match slot.close().await {
                Ok(()) => debug!("✓ Connection {} closed", name),
                Err(e) => {
                    warn!("✗ Connection {} failed to close: {}", name, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        catch_error("close", first_error.map_or(Ok(()), Err))
    }

    pub fn state(&self) -> StorageState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Snapshot of the merged settings.
    pub async fn settings(&self) -> Value {
        Value::Object(self.settings.lock().await.clone())
    }

    pub fn query_names(&self) -> Vec<String> {
        self.queries.names()
    }

    pub fn connection_names(&self) -> Vec<String> {
        self.connections.names()
    }

    pub fn default_connection(&self) -> &str {
        &self.default_connection
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    fn set_state(&self, state: StorageState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator::new(&self.queries, &self.connections, &self.default_connection)
    }

    fn coordinator(&self) -> TransactionCoordinator<'_> {
        TransactionCoordinator::new(&self.queries, &self.connections, &self.default_connection)
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("state", &self.state())
            .field("ready", &self.is_ready())
            .field("default_connection", &self.default_connection)
            .field("connections", &self.connections.names())
            .field("queries", &self.queries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn memory_settings() -> Value {
        json!({"driver": "memory", "connection": {}, "cache": {"driver": "memory"}})
    }

    #[tokio::test]
    async fn test_init_reaches_ready() {
        let storage = Storage::new();
        assert_eq!(storage.state(), StorageState::Initial);

        let ready = storage
            .init(memory_settings(), json!({"q": {"sql": "SELECT 1"}}))
            .await
            .expect("init");

        assert!(ready);
        assert!(storage.is_ready());
        assert_eq!(storage.state(), StorageState::Ready);
        assert_eq!(storage.connection_names(), vec!["main"]);
        assert_eq!(storage.query_names(), vec!["q"]);
    }

    #[tokio::test]
    async fn test_init_with_empty_settings_is_not_ready() {
        let storage = Storage::new();
        let ready = storage.init(json!({}), json!({})).await.expect("init");

        assert!(!ready);
        assert_eq!(storage.state(), StorageState::Ready);
    }

    #[tokio::test]
    async fn test_failed_init_keeps_merged_settings() {
        let storage = Storage::new();
        let result = storage
            .init(memory_settings(), json!({"bad": {"sql": ""}}))
            .await;

        assert!(matches!(result, Err(Error::ValidationError(_))));
        assert_eq!(storage.state(), StorageState::Failed);
        assert!(!storage.is_ready());
        assert_eq!(storage.connection_names(), vec!["main"]);
        assert_eq!(storage.settings().await, memory_settings());
    }

    #[tokio::test]
    async fn test_invalid_settings_change_nothing() {
        let storage = Storage::new();
        storage
            .add_settings(memory_settings())
            .await
            .expect("settings");

        let result = storage
            .add_settings(json!({"driver": "oracle", "connection": {}}))
            .await;

        assert!(matches!(result, Err(Error::ConfigError(_))));
        assert_eq!(storage.settings().await, memory_settings());
        assert!(storage.get_db_connection(None).is_some());
    }

    #[tokio::test]
    async fn test_init_from_json_rejects_bad_text() {
        let storage = Storage::new();
        let result = storage.init_from_json("{", "{}").await;

        assert!(matches!(result, Err(Error::SerializationError(_))));
        assert_eq!(storage.state(), StorageState::Failed);
    }

    #[tokio::test]
    async fn test_driver_lookup() {
        let storage = Storage::new();
        assert!(storage.get_driver("memory").is_some());
        assert!(storage.get_cache_driver("memory").is_some());
        assert!(storage.get_driver("nope").is_none());
    }

    #[tokio::test]
    async fn test_connections_absent_before_init() {
        let storage = Storage::new();
        assert!(storage.get_db_connection(None).is_none());
        assert!(storage.get_cache_connection(Some("main")).is_none());
    }

    #[tokio::test]
    async fn test_health_check_and_close() {
        let storage = Storage::new();
        storage
            .init(json!({"a": memory_settings(), "b": {}}), json!({}))
            .await
            .expect("init");

        let report = storage.health_check().await;
        assert_eq!(report.get("a"), Some(&true));
        assert_eq!(report.get("b"), Some(&true));

        let database = storage.get_db_connection(Some("a")).expect("database");
        storage.close().await.expect("close");

        assert!(storage.connection_names().is_empty());
        assert_eq!(storage.state(), StorageState::Initial);
        assert!(!storage.is_ready());
        assert_eq!(database.health_check().await.ok(), Some(false));
    }
}
