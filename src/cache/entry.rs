//! Cache Entry Module
//!
//! Defines the stamped entry shared by the providers that track expiration
//! themselves.

use std::time::Duration;

use chrono::Utc;

// == Cache Entry ==
/// A serialized value stamped with its absolute expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Codec output, opaque to the provider
    pub value: String,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: i64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry that expires `ttl` from now.
    pub fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: expiration_after(current_timestamp_ms(), ttl),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time reaches `expires_at`, so an
    /// entry whose stamp equals "now" is never served.
    pub fn is_expired(&self) -> bool {
        is_expired_at(self.expires_at, current_timestamp_ms())
    }

    // == Time To Live ==
    /// Remaining lifetime, zero once expired.
    pub fn ttl_remaining(&self) -> Duration {
        let remaining = self.expires_at.saturating_sub(current_timestamp_ms());
        Duration::from_millis(remaining.max(0) as u64)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Absolute expiration for an entry written at `now_ms` with `ttl`.
pub fn expiration_after(now_ms: i64, ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_add(ttl_ms)
}

/// True once `now_ms` has reached `expires_at`.
pub fn is_expired_at(expires_at: i64, now_ms: i64) -> bool {
    now_ms >= expires_at
}
