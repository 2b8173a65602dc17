//! Provider implementations of the cache contract.

pub mod memory;
pub mod redis;
pub mod sqlite;

pub use self::memory::MemoryCache;
pub use self::redis::{ConnectionOwnership, RedisCache};
pub use self::sqlite::SqliteCache;
