//! Profile Cache - Interchangeable caches for fetched game-profile data
//!
//! One cache contract with three backends that behave identically for hits,
//! misses, expiration and clearing:
//! - [`MemoryCache`]: in-process, volatile
//! - [`SqliteCache`]: local file, survives restarts, background expiration sweep
//! - [`RedisCache`]: shared across processes, key-prefix namespaces

pub mod cache;
pub mod config;
pub mod error;
pub mod providers;
pub mod tasks;

pub use cache::{Cache, CacheProvider, CacheStatistics, JsonCodec, ValueCodec};
pub use config::{CacheConfig, MemoryCacheConfig, RedisCacheConfig, SqliteCacheConfig};
pub use error::{Backend, CacheError, Result};
pub use providers::{ConnectionOwnership, MemoryCache, RedisCache, SqliteCache};
pub use tokio_util::sync::CancellationToken;
