//! Error types for the cache providers
//!
//! Provides unified error handling using thiserror. Backend-specific failures
//! (SQLite, Redis, I/O) are folded into these variants inside each provider.

use std::fmt;

use thiserror::Error;

// == Backend Identity ==
/// Identifies which provider produced an error or a statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// In-process volatile store
    Memory,
    /// Local SQLite database file
    Sqlite,
    /// Networked Redis server
    Redis,
}

impl Backend {
    /// Short lowercase name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Memory => "memory",
            Backend::Sqlite => "sqlite",
            Backend::Redis => "redis",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Cache Error Enum ==
/// Unified error type for every cache operation.
#[derive(Error, Debug)]
pub enum CacheError {
    /// An option failed validation before any resource was acquired
    #[error("invalid {backend} cache configuration: `{field}` {reason}")]
    Configuration {
        backend: Backend,
        field: &'static str,
        reason: String,
    },

    /// The backend could not be reached or the connection was lost
    #[error("{backend} cache connection failed: {message}")]
    Connection { backend: Backend, message: String },

    /// Any other backend I/O failure
    #[error("{backend} cache operation failed: {message}")]
    Backend { backend: Backend, message: String },

    /// The caller passed an unusable key, value or TTL
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The value could not be encoded for storage
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The caller cancelled the operation
    #[error("cache operation cancelled")]
    Cancelled,

    /// The provider was used after `dispose`
    #[error("{0} cache used after dispose")]
    Disposed(Backend),
}

impl CacheError {
    // == Constructors ==
    /// Creates a configuration error for `field` of `backend`.
    pub fn configuration(backend: Backend, field: &'static str, reason: impl Into<String>) -> Self {
        CacheError::Configuration {
            backend,
            field,
            reason: reason.into(),
        }
    }

    /// Creates a connection error carrying the backend identity.
    pub fn connection(backend: Backend, message: impl fmt::Display) -> Self {
        CacheError::Connection {
            backend,
            message: message.to_string(),
        }
    }

    /// Creates a generic backend failure carrying the backend identity.
    pub fn backend(backend: Backend, message: impl fmt::Display) -> Self {
        CacheError::Backend {
            backend,
            message: message.to_string(),
        }
    }

    /// Returns true for caller-requested cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled)
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
