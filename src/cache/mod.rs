//! Cache Module
//!
//! The cache contract shared by every backend: the payload-level
//! [`CacheProvider`] trait, the typed [`Cache`] facade, the value codec,
//! stamped entries and per-instance statistics.

mod client;
mod codec;
mod entry;
pub(crate) mod provider;
mod stats;


// Re-export public types
pub use client::Cache;
pub use codec::{CodecError, JsonCodec, ValueCodec};
pub use entry::{current_timestamp_ms, expiration_after, is_expired_at, CacheEntry};
pub use provider::CacheProvider;
pub use stats::{CacheStatistics, HitCounters};
