//! Memory Provider
//!
//! Volatile in-process provider backed by a moka cache. Data is lost when
//! the process exits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::Expiry;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::provider::ensure_usable;
use crate::cache::{
    current_timestamp_ms, is_expired_at, CacheEntry, CacheProvider, CacheStatistics, HitCounters,
};
use crate::config::MemoryCacheConfig;
use crate::error::{Backend, Result};

/// Written keys mapped to the expiration stamp of their current entry.
type TrackedKeys = Arc<StdMutex<HashMap<String, i64>>>;

// == Native Expiry ==
/// Lets moka drop each entry when its own stamp runs out.
struct StampExpiry;

impl Expiry<String, CacheEntry> for StampExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl_remaining())
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl_remaining())
    }
}

fn lock_tracked(
    tracked: &StdMutex<HashMap<String, i64>>,
) -> MutexGuard<'_, HashMap<String, i64>> {
    tracked.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forgets `key` when moka expires it, unless it was re-set since.
fn untrack_expired(tracked: &StdMutex<HashMap<String, i64>>, key: &str, entry: &CacheEntry) {
    let mut tracked = lock_tracked(tracked);
    if tracked.get(key) == Some(&entry.expires_at) {
        tracked.remove(key);
    }
}

// == Memory Cache ==
/// In-process provider.
///
/// moka enforces each entry's TTL natively; every read also checks the
/// entry's own expiration stamp so an entry moka has not purged yet is never
/// served. Keys written through this instance are tracked so `clear` and
/// `stats` can enumerate them without relying on the store. moka's eviction
/// listener drops a key from the tracked set once its entry expires.
pub struct MemoryCache {
    store: Cache<String, CacheEntry>,
    tracked: TrackedKeys,
    writes: Mutex<()>,
    counters: HitCounters,
    default_ttl: Duration,
    disposed: AtomicBool,
}

impl MemoryCache {
    // == Constructor ==
    /// Validates `config` and creates an empty store.
    pub fn new(config: MemoryCacheConfig) -> Result<Self> {
        config.validate()?;

        let tracked: TrackedKeys = Arc::new(StdMutex::new(HashMap::new()));
        let listener_tracked = tracked.clone();
        let store = Cache::builder()
            .expire_after(StampExpiry)
            .eviction_listener(move |key: Arc<String>, entry: CacheEntry, cause| {
                if cause == RemovalCause::Expired {
                    untrack_expired(&listener_tracked, &key, &entry);
                }
            })
            .build();
        info!(default_ttl = ?config.default_ttl, "Memory cache initialized");

        Ok(Self {
            store,
            tracked,
            writes: Mutex::new(()),
            counters: HitCounters::new(),
            default_ttl: config.default_ttl,
            disposed: AtomicBool::new(false),
        })
    }

    fn guard(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_usable(Backend::Memory, self.is_disposed(), cancel)
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        lock_tracked(&self.tracked)
    }

    /// Returns the entry under `key` unless its stamp has run out.
    async fn live_entry(&self, key: &str) -> Option<CacheEntry> {
        self.store
            .get(key)
            .await
            .filter(|entry| !entry.is_expired())
    }
}

#[async_trait]
impl CacheProvider for MemoryCache {
    fn backend(&self) -> Backend {
        Backend::Memory
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn counters(&self) -> &HitCounters {
        &self.counters
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    async fn get_payload(&self, key: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        self.guard(cancel)?;

        let entry = self.live_entry(key).await;
        if let Some(entry) = &entry {
            debug!(key, ttl_remaining = ?entry.ttl_remaining(), "Memory cache hit");
        }
        Ok(entry.map(|entry| entry.value))
    }

    async fn set_payload(
        &self,
        key: &str,
        payload: String,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.guard(cancel)?;

        // Writers are serialized so clear and stats never see a tracked key
        // without its entry.
        let _writes = self.writes.lock().await;
        let entry = CacheEntry::new(payload, ttl);
        self.tracked().insert(key.to_string(), entry.expires_at);
        self.store.insert(key.to_string(), entry).await;

        debug!(key, ttl = ?ttl, "Memory cache set");
        Ok(())
    }

    async fn remove(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        self.guard(cancel)?;

        let _writes = self.writes.lock().await;
        self.tracked().remove(key);
        let removed = self.store.remove(key).await;

        Ok(removed.is_some_and(|entry| !entry.is_expired()))
    }

    async fn exists(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        self.guard(cancel)?;
        Ok(self.live_entry(key).await.is_some())
    }

    async fn clear(&self, cancel: &CancellationToken) -> Result<()> {
        self.guard(cancel)?;

        let _writes = self.writes.lock().await;
        let keys: Vec<String> = self.tracked().drain().map(|(key, _)| key).collect();
        for key in &keys {
            self.store.invalidate(key).await;
        }
        // Let moka reclaim the invalidated slots now rather than lazily.
        self.store.run_pending_tasks().await;

        debug!(removed = keys.len(), "Memory cache cleared");
        Ok(())
    }

    async fn stats(&self, cancel: &CancellationToken) -> Result<CacheStatistics> {
        self.guard(cancel)?;

        let _writes = self.writes.lock().await;
        // Delivers pending expirations to the listener.
        self.store.run_pending_tasks().await;

        let now = current_timestamp_ms();
        let live = self
            .tracked()
            .values()
            .filter(|&&expires_at| !is_expired_at(expires_at, now))
            .count() as i64;

        Ok(self.counters.snapshot(live, None))
    }

    async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.tracked().clear();
        self.store.invalidate_all();
        self.store.run_pending_tasks().await;

        info!("Memory cache disposed");
        Ok(())
    }
}
