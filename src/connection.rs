//! Driver registration table and named connection slots.

use crate::backend::{BackendAdapter, CacheAdapter, DatabaseAdapter};
use crate::error::{Error, Result};
use crate::settings::{ConnectionDefinition, SettingsShape};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a database adapter from its `connection` options.
pub type DatabaseFactory = Arc<dyn Fn(&Value) -> Result<Arc<dyn DatabaseAdapter>> + Send + Sync>;

/// Builds a cache adapter from its options.
pub type CacheFactory = Arc<dyn Fn(&Value) -> Result<Arc<dyn CacheAdapter>> + Send + Sync>;

/// Static table of adapter factories, keyed by driver name.
///
/// The embedding application fills it before any settings are applied;
/// settings can only name drivers registered here.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    databases: HashMap<String, DatabaseFactory>,
    caches: HashMap<String, CacheFactory>,
}

impl DriverRegistry {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding every adapter compiled into the crate.
    ///
    /// | Driver | Kind | Feature |
    /// |--------|------|---------|
    /// | `memory` | database + cache | `inmemory` |
    /// | `postgres` | database | `postgres` |
    /// | `mysql` | database | `mysql` |
    /// | `redis` | cache | `redis` |
    /// | `memcached` | cache | `memcached` |
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "inmemory")]
        {
            use crate::backend::{MemoryCache, MemoryDatabase};
            registry.register_database("memory", |options| {
                Ok(Arc::new(MemoryDatabase::from_options(options)?) as Arc<dyn DatabaseAdapter>)
            });
            registry.register_cache("memory", |options| {
                Ok(Arc::new(MemoryCache::from_options(options)?) as Arc<dyn CacheAdapter>)
            });
        }

        #[cfg(feature = "postgres")]
        registry.register_database("postgres", |options| {
            Ok(Arc::new(crate::backend::PostgresDatabase::from_options(options)?)
                as Arc<dyn DatabaseAdapter>)
        });

        #[cfg(feature = "mysql")]
        registry.register_database("mysql", |options| {
            Ok(Arc::new(crate::backend::MySqlDatabase::from_options(options)?)
                as Arc<dyn DatabaseAdapter>)
        });

        #[cfg(feature = "redis")]
        registry.register_cache("redis", |options| {
            let config = crate::backend::RedisConfig::from_options(options)?;
            Ok(Arc::new(crate::backend::RedisCache::new(config)?) as Arc<dyn CacheAdapter>)
        });

        #[cfg(feature = "memcached")]
        registry.register_cache("memcached", |options| {
            let config = crate::backend::MemcachedConfig::from_options(options)?;
            Ok(Arc::new(crate::backend::MemcachedCache::new(config)?) as Arc<dyn CacheAdapter>)
        });

        registry
    }

    /// Register (or replace) a database driver.
    pub fn register_database<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn DatabaseAdapter>> + Send + Sync + 'static,
    {
        self.databases.insert(name.to_string(), Arc::new(factory));
    }

    /// Register (or replace) a cache driver.
    pub fn register_cache<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn CacheAdapter>> + Send + Sync + 'static,
    {
        self.caches.insert(name.to_string(), Arc::new(factory));
    }

    /// Unconstructed database driver registered under `name`.
    pub fn database(&self, name: &str) -> Option<DatabaseFactory> {
        self.databases.get(name).cloned()
    }

    /// Unconstructed cache driver registered under `name`.
    pub fn cache(&self, name: &str) -> Option<CacheFactory> {
        self.caches.get(name).cloned()
    }

    /// Registered database driver names, sorted.
    pub fn database_drivers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered cache driver names, sorted.
    pub fn cache_drivers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    fn build_database(&self, driver: &str, options: &Value) -> Result<Arc<dyn DatabaseAdapter>> {
        let factory = self.database(driver).ok_or_else(|| {
            Error::ConfigError(format!("Unknown database driver \"{}\"", driver))
        })?;
        factory(options)
    }

    fn build_cache(&self, driver: &str, options: &Value) -> Result<Arc<dyn CacheAdapter>> {
        let factory = self
            .cache(driver)
            .ok_or_else(|| Error::ConfigError(format!("Unknown cache driver \"{}\"", driver)))?;
        factory(options)
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("databases", &self.database_drivers())
            .field("caches", &self.cache_drivers())
            .finish()
    }
}

/// Adapters bound to one connection name.
#[derive(Clone)]
pub enum ConnectionSlot {
    Empty,
    Database(Arc<dyn DatabaseAdapter>),
    Cache(Arc<dyn CacheAdapter>),
    Both {
        database: Arc<dyn DatabaseAdapter>,
        cache: Arc<dyn CacheAdapter>,
    },
}

impl ConnectionSlot {
    pub fn new(
        database: Option<Arc<dyn DatabaseAdapter>>,
        cache: Option<Arc<dyn CacheAdapter>>,
    ) -> Self {
        match (database, cache) {
            (Some(database), Some(cache)) => ConnectionSlot::Both { database, cache },
            (Some(database), None) => ConnectionSlot::Database(database),
            (None, Some(cache)) => ConnectionSlot::Cache(cache),
            (None, None) => ConnectionSlot::Empty,
        }
    }

    /// Construct the adapters a definition asks for.
    pub fn build(definition: &ConnectionDefinition, drivers: &DriverRegistry) -> Result<Self> {
        let database = match (&definition.driver, &definition.connection) {
            (Some(driver), Some(options)) => Some(drivers.build_database(driver, options)?),
            _ => None,
        };

        let cache = match (&definition.redis, &definition.cache) {
            (Some(options), _) => Some(drivers.build_cache("redis", options)?),
            (None, Some(cache)) => Some(
                drivers.build_cache(&cache.driver, &Value::Object(cache.options.clone()))?,
            ),
            (None, None) => None,
        };

        Ok(ConnectionSlot::new(database, cache))
    }

    pub fn database(&self) -> Option<&Arc<dyn DatabaseAdapter>> {
        match self {
            ConnectionSlot::Database(database) | ConnectionSlot::Both { database, .. } => {
                Some(database)
            }
            _ => None,
        }
    }

    pub fn cache(&self) -> Option<&Arc<dyn CacheAdapter>> {
        match self {
            ConnectionSlot::Cache(cache) | ConnectionSlot::Both { cache, .. } => Some(cache),
            _ => None,
        }
    }

    /// Close both adapters; the first failure is returned after both ran.
    pub async fn close(&self) -> Result<()> {
        let database = match self.database() {
            Some(db) => db.close().await,
            None => Ok(()),
        };
        let cache = match self.cache() {
            Some(cache) => cache.close().await,
            None => Ok(()),
        };
        database.and(cache)
    }
}

impl fmt::Debug for ConnectionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSlot")
            .field("database", &self.database().map(|db| db.driver().to_string()))
            .field("cache", &self.cache().map(|c| c.driver().to_string()))
            .finish()
    }
}

/// Build one slot per connection named by validated settings.
pub(crate) fn build_slots(
    shape: &SettingsShape,
    drivers: &DriverRegistry,
    default_connection: &str,
) -> Result<Vec<(String, ConnectionSlot)>> {
    match shape {
        SettingsShape::Single(definition) => Ok(vec![(
            default_connection.to_string(),
            ConnectionSlot::build(definition, drivers)?,
        )]),
        SettingsShape::Named(named) => named
            .iter()
            .map(|(name, definition)| Ok((name.clone(), ConnectionSlot::build(definition, drivers)?)))
            .collect(),
    }
}

/// Live connection slots by name.
#[derive(Default)]
pub struct ConnectionRegistry {
    slots: DashMap<String, ConnectionSlot>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<ConnectionSlot> {
        self.slots.get(name).map(|slot| slot.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Connection names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Swap in a freshly built set of slots, dropping names not in it.
    pub(crate) fn replace_all(&self, slots: Vec<(String, ConnectionSlot)>) {
        let keep: Vec<&str> = slots.iter().map(|(name, _)| name.as_str()).collect();
        self.slots.retain(|name, _| keep.contains(&name.as_str()));
        for (name, slot) in slots {
            debug!("✓ Connection slot \"{}\" applied: {:?}", name, slot);
            self.slots.insert(name, slot);
        }
    }

    /// Remove and return every slot.
    pub(crate) fn drain(&self) -> Vec<(String, ConnectionSlot)> {
        let names = self.names();
        names
            .into_iter()
            .filter_map(|name| self.slots.remove(&name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryCache, MemoryDatabase};
    use crate::settings::validate_settings;
    use serde_json::json;

    fn drivers() -> DriverRegistry {
        let mut drivers = DriverRegistry::new();
        drivers.register_database("memory", |options| {
            Ok(Arc::new(MemoryDatabase::from_options(options)?) as Arc<dyn DatabaseAdapter>)
        });
        drivers.register_cache("redis", |options| {
            Ok(Arc::new(MemoryCache::from_options(options)?) as Arc<dyn CacheAdapter>)
        });
        drivers.register_cache("memory", |options| {
            Ok(Arc::new(MemoryCache::from_options(options)?) as Arc<dyn CacheAdapter>)
        });
        drivers
    }

    fn shape(value: Value) -> SettingsShape {
        validate_settings(value.as_object().expect("object")).expect("valid settings")
    }

    #[test]
    fn test_single_shape_builds_default_slot() {
        let slots = build_slots(
            &shape(json!({"driver": "memory", "connection": {}, "redis": {}})),
            &drivers(),
            "main",
        )
        .expect("slots");

        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].0, "main");
        assert!(matches!(slots[0].1, ConnectionSlot::Both { .. }));
    }

    #[test]
    fn test_named_shape_builds_slot_per_name() {
        let slots = build_slots(
            &shape(json!({
                "a": {"driver": "memory", "connection": {}},
                "b": {"cache": {"driver": "memory"}},
                "c": {}
            })),
            &drivers(),
            "main",
        )
        .expect("slots");

        assert_eq!(slots.len(), 3);
        assert!(slots[0].1.database().is_some() && slots[0].1.cache().is_none());
        assert!(slots[1].1.database().is_none() && slots[1].1.cache().is_some());
        assert!(matches!(slots[2].1, ConnectionSlot::Empty));
    }

    #[test]
    fn test_unknown_driver_is_config_error() {
        let result = build_slots(
            &shape(json!({"driver": "oracle", "connection": {}})),
            &drivers(),
            "main",
        );
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_registry_lookup() {
        let drivers = drivers();
        assert!(drivers.database("memory").is_some());
        assert!(drivers.database("postgres").is_none());
        assert_eq!(drivers.cache_drivers(), vec!["memory", "redis"]);
    }

    #[test]
    fn test_replace_all_drops_stale_names() {
        let registry = ConnectionRegistry::new();
        registry.replace_all(vec![
            ("a".to_string(), ConnectionSlot::Empty),
            ("b".to_string(), ConnectionSlot::Empty),
        ]);
        registry.replace_all(vec![("b".to_string(), ConnectionSlot::Empty)]);

        assert_eq!(registry.names(), vec!["b"]);
        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_slot_close_closes_database() {
        let db = MemoryDatabase::new();
        let slot = ConnectionSlot::new(Some(Arc::new(db.clone())), None);
        slot.close().await.expect("close");
        assert!(db.is_closed());
    }
}
