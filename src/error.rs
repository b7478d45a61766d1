//! Error types for storage operations.

use std::fmt;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the storage facade and its adapters.
///
/// Adapters never retry and never swallow failures: whatever the native
/// driver reports is carried in [`Error::BackendError`] with its message
/// preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Settings or queries payload does not match its schema.
    ValidationError(String),

    /// No query is registered under the requested name.
    NotFoundError(String),

    /// A query references a connection slot that does not exist.
    UnknownConnectionError(String),

    /// Members of one transaction resolve to different connections.
    MixedConnectionError {
        expected: String,
        found: String,
        query: String,
    },

    /// Failure reported by a database or cache adapter.
    BackendError(String),

    /// Positional arguments of a batch call do not line up.
    ShapeError(String),

    /// Structural configuration problem: ambiguous settings shape, unknown
    /// driver, or a slot lacking the adapter an operation needs.
    ConfigError(String),

    /// A value could not be encoded for, or decoded from, a backend.
    SerializationError(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Error::NotFoundError(name) => write!(f, "Can't get query by \"{}\"", name),
            Error::UnknownConnectionError(name) => {
                write!(f, "Undefined connection \"{}\"", name)
            }
            Error::MixedConnectionError {
                expected,
                found,
                query,
            } => write!(
                f,
                "Detected different database connections in transaction: query \"{}\" uses \"{}\", expected \"{}\"",
                query, found, expected
            ),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::ShapeError(msg) => write!(f, "Shape error: {}", msg),
            Error::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

/// Log a failed operation at the facade boundary and hand the error back
/// untouched.
pub(crate) fn catch_error<T>(operation: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        warn!("{}: {}", operation, e);
    }
    result
}
