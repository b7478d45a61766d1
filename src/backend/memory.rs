//! In-memory adapters.
//!
//! [`MemoryCache`] is a TTL-aware key-value cache on top of `DashMap`.
//! [`MemoryDatabase`] is a scripted database: it answers statements with
//! canned rows, can be told to fail on given statements, and keeps a
//! journal of committed writes together with call counters. Both are
//! registered as the `memory` driver and are what the test suite uses as
//! stub and spy backends.

use super::{
    decode_cache_value, encode_cache_value, normalize_rows, BackendAdapter, CacheAdapter, CacheOp,
    DatabaseAdapter,
};
use crate::error::{Error, Result};
use crate::Params;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

struct CacheEntry {
    payload: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

#[derive(Default)]
struct CacheCounters {
    gets: AtomicUsize,
    sets: AtomicUsize,
    batches: AtomicUsize,
}

/// Thread-safe in-memory cache.
///
/// Clones share the same storage and call counters.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    counters: Arc<CacheCounters>,
    prefix: String,
}

impl MemoryCache {
    /// Create an empty cache without key prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache from driver options. Only `prefix` is recognised.
    pub fn from_options(options: &Value) -> Result<Self> {
        let prefix = match options.get("prefix") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(p)) if p.is_empty() || p.ends_with(':') => p.clone(),
            Some(Value::String(p)) => format!("{}:", p),
            Some(other) => {
                return Err(Error::ValidationError(format!(
                    "Cache prefix must be a string, got {}",
                    other
                )))
            }
        };

        Ok(MemoryCache {
            prefix,
            ..Self::default()
        })
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of `get` calls.
    pub fn gets(&self) -> usize {
        self.counters.gets.load(Ordering::SeqCst)
    }

    /// Number of `set` calls.
    pub fn sets(&self) -> usize {
        self.counters.sets.load(Ordering::SeqCst)
    }

    /// Number of batches.
    pub fn batches(&self) -> usize {
        self.counters.batches.load(Ordering::SeqCst)
    }

    /// Calls of any kind.
    pub fn calls(&self) -> usize {
        self.gets() + self.sets() + self.batches()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn read(&self, key: &str) -> Option<Value> {
        let full_key = self.full_key(key);
        let expired = match self.entries.get(&full_key) {
            Some(entry) if !entry.is_expired() => return Some(decode_cache_value(&entry.payload)),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(&full_key);
        }
        None
    }

    fn write(&self, key: &str, value: &Value, expire: u64) -> Result<()> {
        let payload = encode_cache_value(value)?;
        // A lifetime past what `Instant` can represent never expires.
        let expires_at = if expire > 0 {
            Instant::now().checked_add(Duration::from_secs(expire))
        } else {
            None
        };
        self.entries.insert(
            self.full_key(key),
            CacheEntry {
                payload,
                expires_at,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl BackendAdapter for MemoryCache {
    fn driver(&self) -> &str {
        "memory"
    }

    async fn close(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

#[async_trait]
impl CacheAdapter for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        let value = self.read(key);
        debug!(
            "{} Memory GET {}",
            if value.is_some() { "✓" } else { "✗" },
            key
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: &Value, expire: u64) -> Result<()> {
        self.counters.sets.fetch_add(1, Ordering::SeqCst);
        self.write(key, value, expire)?;
        debug!("✓ Memory SET {} (expire: {}s)", key, expire);
        Ok(())
    }

    async fn transaction_request(&self, ops: &[CacheOp]) -> Result<Vec<Option<Value>>> {
        self.counters.batches.fetch_add(1, Ordering::SeqCst);
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            match op {
                CacheOp::Get { key } => results.push(self.read(key)),
                CacheOp::Set { key, value, expire } => {
                    self.write(key, value, *expire)?;
                    results.push(Some(Value::String("OK".to_string())));
                }
            }
        }
        debug!("✓ Memory batch of {} operations", ops.len());
        Ok(results)
    }
}

#[derive(Default)]
struct DatabaseState {
    results: DashMap<String, Vec<Value>>,
    failures: DashMap<String, String>,
    executed: Mutex<Vec<(String, Params)>>,
    journal: Mutex<Vec<String>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    transactions: AtomicUsize,
    closed: AtomicBool,
}

/// Scripted in-memory database.
///
/// Statements are matched by their exact text after conditional fragments
/// have been applied. Unknown statements yield an empty row set. Writes go
/// to a journal; writes inside a transaction reach the journal only when
/// every statement of the transaction succeeded.
///
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<DatabaseState>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a database from driver options.
    ///
    /// `{"results": {"<statement>": [<row>, ...]}}` seeds canned rows.
    pub fn from_options(options: &Value) -> Result<Self> {
        let db = MemoryDatabase::new();
        match options.get("results") {
            None | Some(Value::Null) => {}
            Some(Value::Object(results)) => {
                for (statement, rows) in results {
                    match rows {
                        Value::Array(rows) => db.insert_result(statement, rows.clone()),
                        other => db.insert_result(statement, vec![other.clone()]),
                    }
                }
            }
            Some(other) => {
                return Err(Error::ValidationError(format!(
                    "Memory database results must be an object, got {}",
                    other
                )))
            }
        }
        Ok(db)
    }

    /// Answer `statement` with `rows` from now on.
    pub fn insert_result(&self, statement: &str, rows: Vec<Value>) {
        self.state.results.insert(statement.to_string(), rows);
    }

    /// Make every execution of `statement` fail with `message`.
    pub fn fail_on(&self, statement: &str, message: &str) {
        self.state
            .failures
            .insert(statement.to_string(), message.to_string());
    }

    /// Number of `get_data` calls.
    pub fn reads(&self) -> usize {
        self.state.reads.load(Ordering::SeqCst)
    }

    /// Number of `set_data` calls.
    pub fn writes(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }

    /// Number of `transaction_request` calls.
    pub fn transactions(&self) -> usize {
        self.state.transactions.load(Ordering::SeqCst)
    }

    /// Total number of calls of any kind.
    pub fn calls(&self) -> usize {
        self.reads() + self.writes() + self.transactions()
    }

    /// Every statement run so far, with its parameters, committed or not.
    pub fn executed(&self) -> Vec<(String, Params)> {
        self.state
            .executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Committed write statements in commit order.
    pub fn journal(&self) -> Vec<String> {
        self.state
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether anything was ever committed.
    pub fn committed(&self) -> bool {
        !self.journal().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn run(&self, statement: &str, params: &Params) -> Result<Vec<Value>> {
        if self.is_closed() {
            return Err(Error::BackendError(
                "Memory database is closed".to_string(),
            ));
        }

        self.state
            .executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((statement.to_string(), params.clone()));

        if let Some(message) = self.state.failures.get(statement) {
            return Err(Error::BackendError(message.value().clone()));
        }

        Ok(self
            .state
            .results
            .get(statement)
            .map(|rows| rows.value().clone())
            .unwrap_or_default())
    }

    fn commit(&self, statements: Vec<String>) {
        self.state
            .journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(statements);
    }
}

#[async_trait]
impl BackendAdapter for MemoryDatabase {
    fn driver(&self) -> &str {
        "memory"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.is_closed())
    }

    async fn close(&self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DatabaseAdapter for MemoryDatabase {
    async fn get_data(&self, statement: &str, params: &Params) -> Result<Option<Value>> {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        let rows = self.run(statement, params)?;
        Ok(normalize_rows(rows))
    }

    async fn set_data(&self, statement: &str, params: &Params) -> Result<Option<Value>> {
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        let rows = self.run(statement, params)?;
        self.commit(vec![statement.to_string()]);
        Ok(normalize_rows(rows))
    }

    async fn transaction_request(
        &self,
        statements: &[String],
        params: &[Params],
    ) -> Result<Vec<Option<Value>>> {
        self.state.transactions.fetch_add(1, Ordering::SeqCst);

        let empty = Params::new();
        let mut staged = Vec::with_capacity(statements.len());
        let mut results = Vec::with_capacity(statements.len());

        for (index, statement) in statements.iter().enumerate() {
            let statement_params = params.get(index).unwrap_or(&empty);
            match self.run(statement, statement_params) {
                Ok(rows) => {
                    staged.push(statement.clone());
                    results.push(normalize_rows(rows));
                }
                Err(e) => {
                    debug!(
                        "✗ Memory transaction rolled back at statement {}: {}",
                        index, e
                    );
                    return Err(e);
                }
            }
        }

        self.commit(staged);
        debug!("✓ Memory transaction committed {} statements", statements.len());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_cache_set_get() {
        let cache = MemoryCache::new();
        cache.set("k", &json!({"a": 1}), 0).await.expect("set");
        assert_eq!(cache.get("k").await.expect("get"), Some(json!({"a": 1})));
        assert_eq!(cache.get("missing").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_memory_cache_expiry() {
        let cache = MemoryCache::new();
        cache.set("k", &json!(1), 1).await.expect("set");
        assert_eq!(cache.len(), 1);

        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(cache.get("k").await.expect("get"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_memory_cache_huge_expiry_never_expires() {
        let cache = MemoryCache::new();
        cache.set("k", &json!(1), u64::MAX).await.expect("set");
        assert_eq!(cache.get("k").await.expect("get"), Some(json!(1)));

        let ops = vec![CacheOp::Set {
            key: "b".to_string(),
            value: json!(2),
            expire: u64::MAX,
        }];
        cache.transaction_request(&ops).await.expect("batch");
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_cache_counts_calls() {
        let cache = MemoryCache::new();
        let spy = cache.clone();
        assert_eq!(spy.calls(), 0);

        cache.set("k", &json!(1), 0).await.expect("set");
        cache.get("k").await.expect("get");
        cache.get("other").await.expect("get");
        cache.transaction_request(&[]).await.expect("batch");

        assert_eq!(spy.sets(), 1);
        assert_eq!(spy.gets(), 2);
        assert_eq!(spy.batches(), 1);
        assert_eq!(spy.calls(), 4);
    }

    #[test]
    fn test_memory_cache_prefix_gets_colon() {
        let cache = MemoryCache::from_options(&json!({"prefix": "app"})).expect("options");
        assert_eq!(cache.prefix(), "app:");

        let cache = MemoryCache::from_options(&json!({"prefix": "app:"})).expect("options");
        assert_eq!(cache.prefix(), "app:");

        assert!(MemoryCache::from_options(&json!({"prefix": 5})).is_err());
    }

    #[tokio::test]
    async fn test_memory_cache_batch_preserves_order() {
        let cache = MemoryCache::new();
        cache.set("a", &json!("x"), 0).await.expect("set");

        let results = cache
            .transaction_request(&[
                CacheOp::Get {
                    key: "missing".to_string(),
                },
                CacheOp::Set {
                    key: "b".to_string(),
                    value: json!(2),
                    expire: 0,
                },
                CacheOp::Get {
                    key: "a".to_string(),
                },
                CacheOp::Get {
                    key: "b".to_string(),
                },
            ])
            .await
            .expect("batch");

        assert_eq!(
            results,
            vec![None, Some(json!("OK")), Some(json!("x")), Some(json!(2))]
        );
    }

    #[tokio::test]
    async fn test_memory_database_empty_result_is_none() {
        let db = MemoryDatabase::new();
        db.insert_result("SELECT 1", vec![]);
        assert_eq!(
            db.get_data("SELECT 1", &Params::new()).await.expect("get"),
            None
        );
        assert_eq!(db.reads(), 1);
    }

    #[tokio::test]
    async fn test_memory_database_canned_rows() {
        let db = MemoryDatabase::from_options(&json!({
            "results": {"SELECT * FROM users": [{"id": 1}]}
        }))
        .expect("options");

        let rows = db
            .get_data("SELECT * FROM users", &Params::new())
            .await
            .expect("get");
        assert_eq!(rows, Some(json!([{"id": 1}])));
    }

    #[tokio::test]
    async fn test_memory_database_transaction_rolls_back() {
        let db = MemoryDatabase::new();
        db.fail_on("UPDATE b", "deadlock detected");

        let statements = vec![
            "UPDATE a".to_string(),
            "UPDATE b".to_string(),
            "UPDATE c".to_string(),
        ];
        let params = vec![Params::new(), Params::new(), Params::new()];

        let result = db.transaction_request(&statements, &params).await;
        assert_eq!(
            result,
            Err(Error::BackendError("deadlock detected".to_string()))
        );
        assert!(!db.committed());
        assert_eq!(db.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_database_transaction_commits() {
        let db = MemoryDatabase::new();
        let statements = vec!["UPDATE a".to_string(), "UPDATE b".to_string()];

        let results = db
            .transaction_request(&statements, &[Params::new(), Params::new()])
            .await
            .expect("transaction");

        assert_eq!(results, vec![None, None]);
        assert_eq!(db.journal(), statements);
    }

    #[tokio::test]
    async fn test_memory_database_close() {
        let db = MemoryDatabase::new();
        db.close().await.expect("close");
        assert!(!db.health_check().await.expect("health"));
        assert!(db.get_data("SELECT 1", &Params::new()).await.is_err());
    }
}
