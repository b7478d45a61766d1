//! Memcached cache adapter.

use super::{decode_cache_value, encode_cache_value, BackendAdapter, CacheAdapter, CacheOp};
use crate::error::{Error, Result};
use async_memcached::AsciiProtocol;
use async_trait::async_trait;
use deadpool_memcached::{Manager, Object, Pool};
use serde::Deserialize;
use serde_json::Value;

/// Pool size when neither `pool_size` nor MEMCACHED_POOL_SIZE is set.
const DEFAULT_POOL_SIZE: usize = 16;

/// Options of a `cache: {"driver": "memcached", ...}` settings entry.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemcachedConfig {
    #[serde(default = "default_servers")]
    pub servers: Vec<String>, // e.g., ["localhost:11211", "cache2:11211"]
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub pool_size: Option<usize>,
}

fn default_servers() -> Vec<String> {
    vec!["localhost:11211".to_string()]
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        MemcachedConfig {
            servers: default_servers(),
            prefix: None,
            pool_size: None,
        }
    }
}

impl MemcachedConfig {
    pub fn from_options(options: &Value) -> Result<Self> {
        let mut config: MemcachedConfig = serde_json::from_value(options.clone())
            .map_err(|e| Error::ValidationError(format!("Invalid memcached settings: {}", e)))?;

        if let Some(prefix) = config.prefix.as_mut() {
            if !prefix.is_empty() && !prefix.ends_with(':') {
                prefix.push(':');
            }
        }

        Ok(config)
    }

    fn pool_size(&self) -> usize {
        self.pool_size.unwrap_or_else(|| {
            std::env::var("MEMCACHED_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(DEFAULT_POOL_SIZE)
        })
    }
}

/// Memcached cache with connection pooling.
///
/// Memcached has no transactions, so batches run operation by operation on
/// one pooled connection and are not atomic.
pub struct MemcachedCache {
    pool: Pool,
    prefix: String,
}

impl MemcachedCache {
    /// Create new Memcached adapter from configuration.
    ///
    /// # Errors
    /// Returns `Err` if connection pool creation fails
    pub fn new(config: MemcachedConfig) -> Result<Self> {
        // The pool manager speaks to one server.
        let addr = config
            .servers
            .first()
            .ok_or_else(|| Error::ConfigError("No memcached servers specified".to_string()))?
            .clone();

        let pool_size = config.pool_size();
        let pool = Pool::builder(Manager::new(addr.clone()))
            .max_size(pool_size)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create connection pool: {}", e)))?;

        info!(
            "✓ Memcached cache initialized with server: {} (pool size: {})",
            addr, pool_size
        );

        Ok(MemcachedCache {
            pool,
            prefix: config.prefix.unwrap_or_default(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn connection(&self) -> Result<Object> {
        self.pool.get().await.map_err(|e| {
            Error::BackendError(format!("Failed to get Memcached connection: {}", e))
        })
    }

    async fn read(conn: &mut Object, key: &str) -> Result<Option<Value>> {
        match conn.get(key).await {
            Ok(Some(value)) => Ok(value
                .data
                .map(|bytes| decode_cache_value(&String::from_utf8_lossy(&bytes)))),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::BackendError(format!(
                "Memcached GET failed for key {}: {}",
                key, e
            ))),
        }
    }

    async fn write(conn: &mut Object, key: &str, value: &Value, expire: u64) -> Result<()> {
        let payload = encode_cache_value(value)?;
        // Values < 2592000 (30 days) are interpreted as seconds from now
        let expiration = (expire > 0).then_some(expire as i64);

        conn.set(key, payload.as_bytes(), expiration, None)
            .await
            .map_err(|e| Error::BackendError(format!("Memcached SET failed for key {}: {}", key, e)))
    }
}

#[async_trait]
impl BackendAdapter for MemcachedCache {
    fn driver(&self) -> &str {
        "memcached"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.pool.get().await {
            Ok(mut conn) => Ok(conn.get("__health_check__").await.is_ok()),
            Err(_) => Ok(false),
        }
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}

#[async_trait]
impl CacheAdapter for MemcachedCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = self.connection().await?;
        let value = Self::read(&mut conn, &self.full_key(key)).await?;
        debug!(
            "✓ Memcached GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: &Value, expire: u64) -> Result<()> {
        let mut conn = self.connection().await?;
        Self::write(&mut conn, &self.full_key(key), value, expire).await?;
        debug!("✓ Memcached SET {} (expire: {}s)", key, expire);
        Ok(())
    }

    async fn transaction_request(&self, ops: &[CacheOp]) -> Result<Vec<Option<Value>>> {
        let mut conn = self.connection().await?;
        let mut results = Vec::with_capacity(ops.len());

        for op in ops {
            let key = self.full_key(op.key());
            match op {
                CacheOp::Get { .. } => results.push(Self::read(&mut conn, &key).await?),
                CacheOp::Set { value, expire, .. } => {
                    Self::write(&mut conn, &key, value, *expire).await?;
                    results.push(Some(Value::String("OK".to_string())));
                }
            }
        }

        debug!("✓ Memcached batch of {} operations", ops.len());
        Ok(results)
    }
}
