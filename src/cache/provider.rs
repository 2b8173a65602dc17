//! Provider Contract
//!
//! The payload-level interface every backend implements. Callers normally go
//! through [`Cache`](crate::Cache), which adds typing and hit/miss accounting.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheStatistics, HitCounters};
use crate::error::{Backend, CacheError, Result};

/// A storage backend holding encoded payloads under caller keys.
///
/// Every operation fails with [`CacheError::Cancelled`] without touching the
/// store when `cancel` is already triggered, and with
/// [`CacheError::Disposed`] once [`CacheProvider::dispose`] has run.
/// Implementations never return an entry whose expiration has passed.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Which backend this is.
    fn backend(&self) -> Backend;

    /// TTL applied when a write does not carry one.
    fn default_ttl(&self) -> Duration;

    /// Hit/miss counters owned by this instance.
    fn counters(&self) -> &HitCounters;

    /// True once `dispose` has been called.
    fn is_disposed(&self) -> bool;

    /// Returns the live payload stored under `key`.
    async fn get_payload(&self, key: &str, cancel: &CancellationToken) -> Result<Option<String>>;

    /// Stores `payload` under `key` for `ttl`, replacing any previous entry.
    async fn set_payload(
        &self,
        key: &str,
        payload: String,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Deletes the entry, returning whether a live one was removed.
    async fn remove(&self, key: &str, cancel: &CancellationToken) -> Result<bool>;

    /// True iff a live entry is stored under `key`.
    async fn exists(&self, key: &str, cancel: &CancellationToken) -> Result<bool>;

    /// Removes every entry in this provider's scope.
    async fn clear(&self, cancel: &CancellationToken) -> Result<()>;

    /// Counters plus backend-computed entry count and size.
    async fn stats(&self, cancel: &CancellationToken) -> Result<CacheStatistics>;

    /// Releases owned resources. Safe to call more than once.
    async fn dispose(&self) -> Result<()>;
}

// == Operation Guards ==
/// Fails fast when the provider is disposed or the caller already cancelled.
pub(crate) fn ensure_usable(
    backend: Backend,
    disposed: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    if disposed {
        return Err(CacheError::Disposed(backend));
    }
    if cancel.is_cancelled() {
        return Err(CacheError::Cancelled);
    }
    Ok(())
}

/// Runs `operation` unless `cancel` fires first.
///
/// Dropping the in-flight future is best effort: a statement or command that
/// already reached the backend may still complete there.
pub(crate) async fn run_cancellable<T, F>(cancel: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(CacheError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CacheError::Cancelled),
        result = operation => result,
    }
}
