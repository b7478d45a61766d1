//! Backend adapter contracts and implementations.
//!
//! Every storage engine the facade talks to sits behind one of two traits:
//! [`DatabaseAdapter`] for statement-executing stores and [`CacheAdapter`]
//! for key-value caches. Both extend [`BackendAdapter`], which carries the
//! lifecycle hooks shared by all engines.

use crate::error::{Error, Result};
use crate::Params;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub mod memory;
pub mod sql;

#[cfg(feature = "memcached")]
pub mod memcached;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{MemoryCache, MemoryDatabase};

#[cfg(feature = "memcached")]
pub use memcached::{MemcachedCache, MemcachedConfig};
#[cfg(feature = "mysql")]
pub use mysql::MySqlDatabase;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDatabase;
#[cfg(feature = "redis")]
pub use self::redis::{RedisCache, RedisConfig};

/// Lifecycle shared by database and cache adapters.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Driver name the adapter was registered under.
    fn driver(&self) -> &str;

    /// Check that the backend answers.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Release pooled connections. Calls after the first are no-ops.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Statement-executing backend (relational database).
///
/// Reads and writes return `None` for an empty row set, never an empty
/// array, so callers treat "no data" the same way for every engine.
#[async_trait]
pub trait DatabaseAdapter: BackendAdapter {
    /// Execute a read statement.
    async fn get_data(&self, statement: &str, params: &Params) -> Result<Option<Value>>;

    /// Execute a write or otherwise side-effecting statement.
    async fn set_data(&self, statement: &str, params: &Params) -> Result<Option<Value>>;

    /// Execute `statements` in order as one atomic unit on one physical
    /// connection: begin, run each statement, commit. The first failure
    /// rolls everything back and is returned as is.
    ///
    /// `params[i]` belongs to `statements[i]`; callers pad the list so both
    /// slices have the same length.
    async fn transaction_request(
        &self,
        statements: &[String],
        params: &[Params],
    ) -> Result<Vec<Option<Value>>>;
}

/// Key-value cache backend.
#[async_trait]
pub trait CacheAdapter: BackendAdapter {
    /// Read a key. Missing or expired keys yield `None`.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key`; `expire` is in seconds, `0` keeps it forever.
    async fn set(&self, key: &str, value: &Value, expire: u64) -> Result<()>;

    /// Run a batch of cache operations atomically where the engine allows.
    ///
    /// Results line up with `ops`: a `get` yields the cached value or `None`
    /// on a miss, a `set` yields the engine's acknowledgement (`"OK"`).
    async fn transaction_request(&self, ops: &[CacheOp]) -> Result<Vec<Option<Value>>>;
}

/// Kind of operation inside a cache batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    Get,
    Set,
}

impl fmt::Display for CacheAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheAction::Get => write!(f, "get"),
            CacheAction::Set => write!(f, "set"),
        }
    }
}

impl FromStr for CacheAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "get" => Ok(CacheAction::Get),
            "set" => Ok(CacheAction::Set),
            other => Err(Error::ShapeError(format!(
                "Unknown cache action \"{}\", expected get or set",
                other
            ))),
        }
    }
}

/// One positional entry of a cache batch.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOp {
    Get { key: String },
    Set { key: String, value: Value, expire: u64 },
}

impl CacheOp {
    pub fn key(&self) -> &str {
        match self {
            CacheOp::Get { key } | CacheOp::Set { key, .. } => key,
        }
    }
}

/// Serialize a value into the JSON text stored in a cache.
pub(crate) fn encode_cache_value(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode cached text: valid JSON is parsed, anything else comes back as a
/// plain string.
pub(crate) fn decode_cache_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Collapse an empty row set into `None`.
pub(crate) fn normalize_rows(rows: Vec<Value>) -> Option<Value> {
    if rows.is_empty() {
        None
    } else {
        Some(Value::Array(rows))
    }
}
