//! Redis cache adapter.

use super::{decode_cache_value, encode_cache_value, BackendAdapter, CacheAdapter, CacheOp};
use crate::error::{Error, Result};
use async_trait::async_trait;
use deadpool_redis::redis::{cmd, pipe, Cmd, Value as RedisValue};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::Value;

/// Default Redis connection pool size.
/// Override with the REDIS_POOL_SIZE environment variable or `pool_size`.
const DEFAULT_POOL_SIZE: usize = 16;

/// Connection options of a `redis` settings entry.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Full connection URL; takes precedence over the discrete fields.
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db: Option<i64>,
    pub password: Option<String>,
    /// Namespace for every key; always ends with `:`.
    pub prefix: Option<String>,
    pub pool_size: Option<usize>,
}

impl RedisConfig {
    /// Parse options from a settings entry, normalising the key prefix.
    pub fn from_options(options: &Value) -> Result<Self> {
        let mut config: RedisConfig = serde_json::from_value(options.clone())
            .map_err(|e| Error::ValidationError(format!("Invalid redis settings: {}", e)))?;

        if let Some(prefix) = config.prefix.as_mut() {
            if !prefix.is_empty() && !prefix.ends_with(':') {
                prefix.push(':');
            }
        }

        Ok(config)
    }

    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }

        let host = self.host.as_deref().unwrap_or("127.0.0.1");
        let port = self.port.unwrap_or(6379);
        let auth = self
            .password
            .as_ref()
            .map(|p| format!(":{}@", p))
            .unwrap_or_default();
        let db = self.db.unwrap_or(0);

        format!("redis://{}{}:{}/{}", auth, host, port, db)
    }

    fn pool_size(&self) -> usize {
        self.pool_size.unwrap_or_else(|| {
            std::env::var("REDIS_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(DEFAULT_POOL_SIZE)
        })
    }
}

/// Redis cache with pooled async connections.
///
/// Values are stored as JSON text. Batches run inside `MULTI`/`EXEC`.
pub struct RedisCache {
    config: RedisConfig,
    pool: OnceCell<Pool>,
}

impl RedisCache {
    /// Create the adapter and build its pool. Connections are opened on
    /// first use.
    ///
    /// # Errors
    /// Returns `Err` if the pool cannot be created from the configuration
    pub fn new(config: RedisConfig) -> Result<Self> {
        let cache = RedisCache {
            config,
            pool: OnceCell::new(),
        };
        cache.connect()?;

        info!(
            "✓ Redis cache initialized (pool size: {}, prefix: {:?})",
            cache.config.pool_size(),
            cache.config.prefix
        );

        Ok(cache)
    }

    /// Build the connection pool, or return the existing one.
    pub fn connect(&self) -> Result<&Pool> {
        self.pool.get_or_try_init(|| {
            let mut cfg = Config::from_url(self.config.connection_url());
            cfg.pool = Some(PoolConfig::new(self.config.pool_size()));
            cfg.create_pool(Some(Runtime::Tokio1))
                .map_err(|e| Error::ConfigError(format!("Failed to create Redis pool: {}", e)))
        })
    }

    fn full_key(&self, key: &str) -> String {
        match &self.config.prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key.to_string(),
        }
    }

    async fn connection(&self) -> Result<Connection> {
        self.connect()?
            .get()
            .await
            .map_err(|e| Error::BackendError(format!("Failed to get Redis connection: {}", e)))
    }

    fn set_cmd(&self, key: &str, payload: String, expire: u64) -> Cmd {
        let mut command = if expire > 0 {
            let mut setex = cmd("SETEX");
            setex.arg(self.full_key(key)).arg(expire);
            setex
        } else {
            let mut set = cmd("SET");
            set.arg(self.full_key(key));
            set
        };
        command.arg(payload);
        command
    }
}

fn from_redis_value(value: RedisValue) -> Option<Value> {
    match value {
        RedisValue::Nil => None,
        RedisValue::Okay => Some(Value::String("OK".to_string())),
        RedisValue::SimpleString(s) => Some(decode_cache_value(&s)),
        RedisValue::BulkString(bytes) => Some(decode_cache_value(&String::from_utf8_lossy(&bytes))),
        RedisValue::Int(i) => Some(Value::from(i)),
        _ => None,
    }
}

#[async_trait]
impl BackendAdapter for RedisCache {
    fn driver(&self) -> &str {
        "redis"
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = match self.connection().await {
            Ok(conn) => conn,
            Err(_) => return Ok(false),
        };
        Ok(cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok())
    }

    async fn close(&self) -> Result<()> {
        if let Some(pool) = self.pool.get() {
            pool.close();
            info!("✓ Redis pool closed");
        }
        Ok(())
    }
}

#[async_trait]
impl CacheAdapter for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = cmd("GET")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::BackendError(e.to_string()))?;

        match raw {
            Some(raw) => {
                debug!("✓ Redis GET {} -> HIT", key);
                Ok(Some(decode_cache_value(&raw)))
            }
            None => {
                debug!("✗ Redis GET {} -> MISS", key);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &Value, expire: u64) -> Result<()> {
        let payload = encode_cache_value(value)?;
        let mut conn = self.connection().await?;
        self.set_cmd(key, payload, expire)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::BackendError(e.to_string()))?;

        debug!("✓ Redis SET {} (expire: {}s)", key, expire);
        Ok(())
    }

    async fn transaction_request(&self, ops: &[CacheOp]) -> Result<Vec<Option<Value>>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let mut batch = pipe();
        batch.atomic();
        for op in ops {
            match op {
                CacheOp::Get { key } => {
                    batch.cmd("GET").arg(self.full_key(key));
                }
                CacheOp::Set { key, value, expire } => {
                    batch.add_command(self.set_cmd(key, encode_cache_value(value)?, *expire));
                }
            }
        }

        let mut conn = self.connection().await?;
        let replies: Vec<RedisValue> = batch
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::BackendError(e.to_string()))?;

        debug!("✓ Redis MULTI/EXEC {} operations", ops.len());
        Ok(replies.into_iter().map(from_redis_value).collect())
    }
}
