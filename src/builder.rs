//! Builder for configuring a [`Storage`] before first use.

use crate::backend::{CacheAdapter, DatabaseAdapter};
use crate::connection::DriverRegistry;
use crate::error::Result;
use crate::storage::Storage;
use serde_json::Value;
use std::sync::Arc;

/// Fluent builder for a [`Storage`].
///
/// Starts from every driver compiled into the crate and `"main"` as the
/// default connection name.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use storage_kit::backend::{DatabaseAdapter, MemoryDatabase};
/// use storage_kit::Storage;
///
/// let shared = MemoryDatabase::new();
/// let spy = shared.clone();
///
/// let storage = Storage::builder()
///     .with_database_driver("spy", move |_| Ok(Arc::new(spy.clone()) as Arc<dyn DatabaseAdapter>))
///     .with_default_connection("primary")
///     .build();
///
/// assert_eq!(storage.default_connection(), "primary");
/// assert!(storage.get_driver("spy").is_some());
/// ```
pub struct StorageBuilder {
    drivers: DriverRegistry,
    default_connection: String,
}

impl StorageBuilder {
    pub fn new() -> Self {
        Self {
            drivers: DriverRegistry::with_defaults(),
            default_connection: crate::DEFAULT_CONNECTION.to_string(),
        }
    }

    /// Replace the whole driver table.
    pub fn with_drivers(mut self, drivers: DriverRegistry) -> Self {
        self.drivers = drivers;
        self
    }

    /// Register a database driver, replacing one of the same name.
    pub fn with_database_driver<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<Arc<dyn DatabaseAdapter>> + Send + Sync + 'static,
    {
        self.drivers.register_database(name, factory);
        self
    }

    /// Register a cache driver, replacing one of the same name.
    pub fn with_cache_driver<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<Arc<dyn CacheAdapter>> + Send + Sync + 'static,
    {
        self.drivers.register_cache(name, factory);
        self
    }

    /// Connection used by queries without a `connection` and by the
    /// single-connection settings shape.
    pub fn with_default_connection(mut self, name: &str) -> Self {
        self.default_connection = name.to_string();
        self
    }

    pub fn build(self) -> Storage {
        debug!(
            "Building storage (default connection: {}, drivers: {:?})",
            self.default_connection, self.drivers
        );
        Storage::from_parts(self.drivers, self.default_connection)
    }
}

impl Default for StorageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
