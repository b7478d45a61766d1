//! # storage-kit
//!
//! One facade over relational databases and caches, driven by named queries.
//!
//! ## Features
//!
//! - **Named Queries:** Statements are registered once under a name and called by that name
//! - **Cache-Aside Reads:** Database results are written back to the cache in the background
//! - **Multiple Connections:** Each named connection pairs an optional database with an optional cache
//! - **Transactions:** Several named queries run atomically on one connection
//! - **Backend Agnostic:** In-memory, PostgreSQL, MySQL, Redis and Memcached adapters, or your own
//!
//! ## Quick Start
//!
//! ```ignore
//! use serde_json::json;
//! use storage_kit::Storage;
//!
//! let storage = Storage::new();
//! storage
//!     .init(
//!         json!({
//!             "driver": "postgres",
//!             "connection": "postgres://app@localhost/app",
//!             "redis": {"host": "localhost", "prefix": "app"}
//!         }),
//!         json!({
//!             "user": {
//!                 "sql": "SELECT * FROM users WHERE id = :id$>active<",
//!                 "caching": true,
//!                 "expire": 300,
//!                 "addition": {"active": " AND active = :active"}
//!             }
//!         }),
//!     )
//!     .await?;
//!
//! let params = json!({"id": 42}).as_object().cloned().unwrap_or_default();
//! let user = storage.get_data("user", &params).await?;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod builder;
pub mod connection;
pub mod error;
pub mod key;
pub mod orchestrator;
pub mod query;
pub mod settings;
pub mod storage;
pub mod strategy;
pub mod transaction;

/// Parameters of one call, in caller order.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Connection used when a query or settings object names none.
pub const DEFAULT_CONNECTION: &str = "main";

// Re-exports for convenience
pub use backend::{BackendAdapter, CacheAction, CacheAdapter, CacheOp, DatabaseAdapter};
pub use builder::StorageBuilder;
pub use connection::{ConnectionSlot, DriverRegistry};
pub use error::{Error, Result};
pub use key::CacheKeyBuilder;
pub use query::QueryDescriptor;
pub use storage::{Storage, StorageState};
pub use strategy::ReadPolicy;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
