//! Read/write orchestration over the registries.

use crate::backend::{CacheAdapter, DatabaseAdapter};
use crate::connection::{ConnectionRegistry, ConnectionSlot};
use crate::error::{Error, Result};
use crate::key::CacheKeyBuilder;
use crate::query::{QueryDescriptor, QueryRegistry};
use crate::strategy::ReadPolicy;
use crate::Params;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Runs single named reads and writes.
///
/// Borrowed from a [`Storage`](crate::Storage) for the length of one call.
pub struct Orchestrator<'a> {
    queries: &'a QueryRegistry,
    connections: &'a ConnectionRegistry,
    default_connection: &'a str,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        queries: &'a QueryRegistry,
        connections: &'a ConnectionRegistry,
        default_connection: &'a str,
    ) -> Self {
        Orchestrator {
            queries,
            connections,
            default_connection,
        }
    }

    /// Resolve a query name to its descriptor and connection slot.
    pub fn resolve(&self, query_name: &str) -> Result<(QueryDescriptor, ConnectionSlot)> {
        let query = self
            .queries
            .resolve(query_name, self.connections, self.default_connection)?;
        let slot = self
            .connections
            .get(&query.connection)
            .ok_or_else(|| Error::UnknownConnectionError(query.connection.clone()))?;
        Ok((query, slot))
    }

    /// Slot registered under `connection`, or the default one.
    pub fn slot(&self, connection: Option<&str>) -> Result<(String, ConnectionSlot)> {
        let name = connection.unwrap_or(self.default_connection);
        let slot = self
            .connections
            .get(name)
            .ok_or_else(|| Error::UnknownConnectionError(name.to_string()))?;
        Ok((name.to_string(), slot))
    }

    /// Read through the named query under `policy`.
    ///
    /// # Errors
    ///
    /// - `Error::NotFoundError` / `Error::UnknownConnectionError`: the name
    ///   does not resolve; no backend is touched
    /// - `Error::ConfigError`: `DatabaseOnly` on a connection without a
    ///   database adapter
    /// - `Error::BackendError`: a cache read or the database read failed
    pub async fn read(
        &self,
        query_name: &str,
        params: &Params,
        policy: ReadPolicy,
    ) -> Result<Option<Value>> {
        let timer = Instant::now();
        let (query, slot) = self.resolve(query_name)?;
        let cache_key = CacheKeyBuilder::build(query_name, params);

        debug!(
            "» Read for key: {} (policy: {}, connection: {})",
            cache_key, policy, query.connection
        );

        let mut cached = None;
        if policy.reads_cache() {
            if let Some(cache) = slot.cache() {
                cached = cache.get(&cache_key).await?;
                if cached.is_some() {
                    debug!("✓ Cache hit for {} in {:?}", cache_key, timer.elapsed());
                    return Ok(cached);
                }
                debug!("✗ Cache miss for {}", cache_key);
            }
        }

        let database = match slot.database() {
            Some(database) => database,
            None if policy == ReadPolicy::DatabaseOnly => {
                return Err(Self::missing_database(&query.connection))
            }
            None => return Ok(cached),
        };

        let query = query.augment(params);
        let result = database.get_data(&query.sql, params).await?;

        if policy.writes_cache() && query.caching {
            if let (Some(cache), Some(value)) = (slot.cache(), &result) {
                match policy {
                    ReadPolicy::Reload => match cache.set(&cache_key, value, query.expire).await {
                        Ok(()) => debug!("✓ Cache reloaded for {}", cache_key),
                        Err(e) => warn!("✗ Cache reload failed for {}: {}", cache_key, e),
                    },
                    _ => {
                        populate_in_background(
                            Arc::clone(cache),
                            cache_key.clone(),
                            value.clone(),
                            query.expire,
                        )
                        .await
                    }
                }
            }
        }

        info!(
            "✓ Read {} from database in {:?}",
            query_name,
            timer.elapsed()
        );
        Ok(result)
    }

    /// Run the named query as a write against the database, bypassing the
    /// cache.
    pub async fn write(&self, query_name: &str, params: &Params) -> Result<Option<Value>> {
        let (query, slot) = self.resolve(query_name)?;
        let database = Self::database(&slot, &query.connection)?;
        let query = query.augment(params);

        let result = database.set_data(&query.sql, params).await?;
        debug!("✓ Write {} on connection {}", query_name, query.connection);
        Ok(result)
    }

    /// Read a literal key from a connection's cache.
    pub async fn cache_get(&self, connection: Option<&str>, key: &str) -> Result<Option<Value>> {
        let (name, slot) = self.slot(connection)?;
        Self::cache(&slot, &name)?.get(key).await
    }

    /// Write a literal key to a connection's cache.
    pub async fn cache_set(
        &self,
        connection: Option<&str>,
        key: &str,
        value: &Value,
        expire: u64,
    ) -> Result<()> {
        let (name, slot) = self.slot(connection)?;
        Self::cache(&slot, &name)?.set(key, value, expire).await
    }

    pub(crate) fn database<'s>(
        slot: &'s ConnectionSlot,
        connection: &str,
    ) -> Result<&'s Arc<dyn DatabaseAdapter>> {
        slot.database()
            .ok_or_else(|| Self::missing_database(connection))
    }

    pub(crate) fn cache<'s>(
        slot: &'s ConnectionSlot,
        connection: &str,
    ) -> Result<&'s Arc<dyn CacheAdapter>> {
        slot.cache().ok_or_else(|| {
            Error::ConfigError(format!(
                "Connection \"{}\" has no cache adapter",
                connection
            ))
        })
    }

    fn missing_database(connection: &str) -> Error {
        Error::ConfigError(format!(
            "Connection \"{}\" has no database adapter",
            connection
        ))
    }
}

/// Write a database result to the cache without holding up the caller.
/// Failures are logged and dropped. Outside a tokio runtime the write runs
/// inline.
async fn populate_in_background(
    cache: Arc<dyn CacheAdapter>,
    key: String,
    value: Value,
    expire: u64,
) {
    let task = async move {
        match cache.set(&key, &value, expire).await {
            Ok(()) => debug!("✓ Cached {} (expire: {}s)", key, expire),
            Err(e) => warn!("Cache population failed for {}: {}", key, e),
        }
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => task.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryCache, MemoryDatabase};
    use crate::settings::QueryDefinition;
    use serde_json::json;
    use std::collections::BTreeMap;

    struct Fixture {
        queries: QueryRegistry,
        connections: ConnectionRegistry,
        db: MemoryDatabase,
        cache: MemoryCache,
    }

    impl Fixture {
        fn new(with_cache: bool, with_db: bool) -> Self {
            let db = MemoryDatabase::new();
            let cache = MemoryCache::new();
            let connections = ConnectionRegistry::new();
            connections.replace_all(vec![(
                "main".to_string(),
                ConnectionSlot::new(
                    with_db.then(|| Arc::new(db.clone()) as Arc<dyn DatabaseAdapter>),
                    with_cache.then(|| Arc::new(cache.clone()) as Arc<dyn CacheAdapter>),
                ),
            )]);

            let queries = QueryRegistry::new();
            let mut addition = BTreeMap::new();
            addition.insert("active".to_string(), " WHERE active".to_string());
            queries.merge(vec![
                (
                    "users".to_string(),
                    QueryDefinition {
                        sql: "SELECT * FROM users$>active<".to_string(),
                        connection: None,
                        caching: true,
                        expire: 0,
                        addition,
                    },
                ),
                (
                    "uncached".to_string(),
                    QueryDefinition {
                        sql: "SELECT * FROM logs".to_string(),
                        connection: None,
                        caching: false,
                        expire: 0,
                        addition: BTreeMap::new(),
                    },
                ),
            ]);

            Fixture {
                queries,
                connections,
                db,
                cache,
            }
        }

        fn orchestrator(&self) -> Orchestrator<'_> {
            Orchestrator::new(&self.queries, &self.connections, "main")
        }
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_cache_aside_populates_then_hits() {
        let fx = Fixture::new(true, true);
        fx.db.insert_result("SELECT * FROM users", vec![json!({"id": 1})]);

        let first = fx
            .orchestrator()
            .read("users", &Params::new(), ReadPolicy::CacheAside)
            .await
            .expect("first read");
        settle().await;

        let second = fx
            .orchestrator()
            .read("users", &Params::new(), ReadPolicy::CacheAside)
            .await
            .expect("second read");

        assert_eq!(first, Some(json!([{"id": 1}])));
        assert_eq!(second, first);
        assert_eq!(fx.db.reads(), 1);
    }

    #[tokio::test]
    async fn test_cache_aside_skips_uncached_queries() {
        let fx = Fixture::new(true, true);
        fx.db.insert_result("SELECT * FROM logs", vec![json!({"line": "x"})]);

        fx.orchestrator()
            .read("uncached", &Params::new(), ReadPolicy::CacheAside)
            .await
            .expect("read");
        settle().await;

        assert!(fx.cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_aside_does_not_cache_empty_results() {
        let fx = Fixture::new(true, true);

        let result = fx
            .orchestrator()
            .read("users", &Params::new(), ReadPolicy::CacheAside)
            .await
            .expect("read");
        settle().await;

        assert_eq!(result, None);
        assert!(fx.cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_only_connection_returns_cache_value() {
        let fx = Fixture::new(true, false);
        fx.cache
            .set("users", &json!("cached"), 0)
            .await
            .expect("seed cache");

        let hit = fx
            .orchestrator()
            .read("users", &Params::new(), ReadPolicy::CacheAside)
            .await
            .expect("read");
        assert_eq!(hit, Some(json!("cached")));

        let params = json!({"id": 2});
        let miss = fx
            .orchestrator()
            .read(
                "users",
                params.as_object().expect("object"),
                ReadPolicy::CacheAside,
            )
            .await
            .expect("read");
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn test_database_only_ignores_cache() {
        let fx = Fixture::new(true, true);
        fx.cache
            .set("users", &json!("stale"), 0)
            .await
            .expect("seed cache");
        fx.db.insert_result("SELECT * FROM users", vec![json!({"id": 1})]);

        let result = fx
            .orchestrator()
            .read("users", &Params::new(), ReadPolicy::DatabaseOnly)
            .await
            .expect("read");
        settle().await;

        assert_eq!(result, Some(json!([{"id": 1}])));
        assert_eq!(
            fx.cache.get("users").await.expect("cache get"),
            Some(json!("stale"))
        );
    }

    #[tokio::test]
    async fn test_database_only_requires_database() {
        let fx = Fixture::new(true, false);
        let result = fx
            .orchestrator()
            .read("users", &Params::new(), ReadPolicy::DatabaseOnly)
            .await;
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_reload_overwrites_cache() {
        let fx = Fixture::new(true, true);
        fx.cache
            .set("users", &json!("stale"), 0)
            .await
            .expect("seed cache");
        fx.db.insert_result("SELECT * FROM users", vec![json!({"id": 9})]);

        let result = fx
            .orchestrator()
            .read("users", &Params::new(), ReadPolicy::Reload)
            .await
            .expect("reload");

        assert_eq!(result, Some(json!([{"id": 9}])));
        assert_eq!(
            fx.cache.get("users").await.expect("cache get"),
            Some(json!([{"id": 9}]))
        );
    }

    #[tokio::test]
    async fn test_read_applies_fragments() {
        let fx = Fixture::new(false, true);
        let params = json!({"active": true});

        fx.orchestrator()
            .read(
                "users",
                params.as_object().expect("object"),
                ReadPolicy::DatabaseOnly,
            )
            .await
            .expect("read");

        let executed = fx.db.executed();
        assert_eq!(executed[0].0, "SELECT * FROM users WHERE active");
        assert_eq!(executed[0].1.get("active"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_write_goes_to_database_only() {
        let fx = Fixture::new(true, true);
        fx.orchestrator()
            .write("users", &Params::new())
            .await
            .expect("write");

        assert_eq!(fx.db.writes(), 1);
        assert_eq!(fx.db.journal(), vec!["SELECT * FROM users"]);
        assert!(fx.cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_get_set_by_connection() {
        let fx = Fixture::new(true, true);
        let orchestrator = fx.orchestrator();

        orchestrator
            .cache_set(None, "token", &json!({"user": 1}), 30)
            .await
            .expect("set");
        assert_eq!(
            orchestrator
                .cache_get(Some("main"), "token")
                .await
                .expect("get"),
            Some(json!({"user": 1}))
        );

        assert_eq!(
            orchestrator.cache_get(Some("other"), "token").await,
            Err(Error::UnknownConnectionError("other".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unknown_query_touches_nothing() {
        let fx = Fixture::new(true, true);
        let result = fx
            .orchestrator()
            .read("missing", &Params::new(), ReadPolicy::CacheAside)
            .await;

        assert_eq!(result, Err(Error::NotFoundError("missing".to_string())));
        assert_eq!(fx.db.calls(), 0);
    }
}
