//! Read policies of the orchestrator.

use std::fmt;

/// How a named read uses the cache.
///
/// # Example
///
/// ```
/// use storage_kit::strategy::ReadPolicy;
///
/// assert!(ReadPolicy::CacheAside.reads_cache());
/// assert!(!ReadPolicy::Reload.reads_cache());
/// assert_eq!(ReadPolicy::DatabaseOnly.to_string(), "DatabaseOnly");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Serve from cache on a hit. On a miss read the database and populate
    /// the cache in the background.
    CacheAside,

    /// Read the database only. The cache is neither read nor written.
    DatabaseOnly,

    /// Read the database and overwrite the cache entry, ignoring whatever
    /// it held. The cache write completes before the call returns; a
    /// failed write is logged and the database result is still returned.
    Reload,
}

impl ReadPolicy {
    /// Whether an existing cache entry may answer the read.
    pub fn reads_cache(&self) -> bool {
        matches!(self, ReadPolicy::CacheAside)
    }

    /// Whether a database result may be written back to the cache.
    pub fn writes_cache(&self) -> bool {
        matches!(self, ReadPolicy::CacheAside | ReadPolicy::Reload)
    }
}

impl fmt::Display for ReadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadPolicy::CacheAside => write!(f, "CacheAside"),
            ReadPolicy::DatabaseOnly => write!(f, "DatabaseOnly"),
            ReadPolicy::Reload => write!(f, "Reload"),
        }
    }
}
