//! Typed Cache Facade
//!
//! [`Cache`] is what the fetch layer talks to. It encodes values with the
//! codec chosen at construction, delegates storage to the bound provider and
//! keeps that provider's hit/miss counters in step with every `get`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cache::codec::{JsonCodec, ValueCodec};
use crate::cache::provider::{ensure_usable, CacheProvider};
use crate::cache::CacheStatistics;
use crate::config::CacheConfig;
use crate::error::{Backend, CacheError, Result};
use crate::providers::{MemoryCache, RedisCache, SqliteCache};

// == Cache ==
/// Backend-agnostic cache for typed values.
///
/// # Example
/// ```ignore
/// let cache = Cache::new(Arc::new(MemoryCache::new(MemoryCacheConfig::default())?));
/// let cancel = CancellationToken::new();
///
/// cache.set("player:123", &profile, None, &cancel).await?;
/// let cached: Option<Profile> = cache.get("player:123", &cancel).await?;
/// ```
pub struct Cache<C: ValueCodec = JsonCodec> {
    provider: Arc<dyn CacheProvider>,
    codec: C,
}

impl<C: ValueCodec + Clone> Clone for Cache<C> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl<C: ValueCodec> fmt::Debug for Cache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.provider.backend())
            .finish_non_exhaustive()
    }
}

impl Cache<JsonCodec> {
    /// Binds `provider` with the JSON codec.
    pub fn new(provider: Arc<dyn CacheProvider>) -> Self {
        Self::with_codec(provider, JsonCodec)
    }

    /// Validates `config`, opens the selected backend and binds it.
    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        let provider: Arc<dyn CacheProvider> = match config {
            CacheConfig::Memory(memory) => Arc::new(MemoryCache::new(memory.clone())?),
            CacheConfig::Sqlite(sqlite) => Arc::new(SqliteCache::open(sqlite.clone()).await?),
            CacheConfig::Redis(redis) => Arc::new(RedisCache::connect(redis.clone()).await?),
        };
        Ok(Self::new(provider))
    }
}

impl<C: ValueCodec> Cache<C> {
    /// Binds `provider` with an explicit codec.
    pub fn with_codec(provider: Arc<dyn CacheProvider>, codec: C) -> Self {
        Self { provider, codec }
    }

    /// The backend this cache is bound to.
    pub fn backend(&self) -> Backend {
        self.provider.backend()
    }

    /// The bound provider.
    pub fn provider(&self) -> &Arc<dyn CacheProvider> {
        &self.provider
    }

    // == Get ==
    /// Returns the live value under `key`, or `None`.
    ///
    /// Exactly one of the hit/miss counters moves per completed call. Empty
    /// keys and payloads that no longer decode as `T` count as misses.
    pub async fn get<T>(&self, key: &str, cancel: &CancellationToken) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        ensure_usable(self.backend(), self.provider.is_disposed(), cancel)?;
        let counters = self.provider.counters();

        if key.is_empty() {
            counters.record_miss();
            return Ok(None);
        }

        let Some(payload) = self.provider.get_payload(key, cancel).await? else {
            counters.record_miss();
            return Ok(None);
        };

        match self.codec.decode(&payload) {
            Ok(value) => {
                counters.record_hit();
                Ok(Some(value))
            }
            Err(e) => {
                warn!(
                    backend = %self.backend(),
                    key,
                    error = %e,
                    "Undecodable cache payload treated as miss"
                );
                counters.record_miss();
                Ok(None)
            }
        }
    }

    // == Set ==
    /// Stores `value` under `key` for `ttl`, or the provider's default TTL.
    ///
    /// Overwrites any existing entry. Empty keys, null values and zero TTLs
    /// are rejected with [`CacheError::InvalidArgument`].
    pub async fn set<T>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        ensure_usable(self.backend(), self.provider.is_disposed(), cancel)?;

        if key.is_empty() {
            return Err(CacheError::InvalidArgument("key must not be empty".to_string()));
        }
        let ttl = ttl.unwrap_or_else(|| self.provider.default_ttl());
        if ttl.is_zero() {
            return Err(CacheError::InvalidArgument("ttl must be positive".to_string()));
        }

        let payload = self
            .codec
            .encode(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?
            .ok_or_else(|| CacheError::InvalidArgument("value must not be null".to_string()))?;

        self.provider.set_payload(key, payload, ttl, cancel).await
    }

    // == Remove ==
    /// Deletes the entry under `key`, returning whether one was removed.
    pub async fn remove(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        ensure_usable(self.backend(), self.provider.is_disposed(), cancel)?;
        if key.is_empty() {
            return Ok(false);
        }
        self.provider.remove(key, cancel).await
    }

    // == Exists ==
    /// True iff a live entry is stored under `key`.
    pub async fn exists(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        ensure_usable(self.backend(), self.provider.is_disposed(), cancel)?;
        if key.is_empty() {
            return Ok(false);
        }
        self.provider.exists(key, cancel).await
    }

    // == Clear ==
    /// Removes every entry in the provider's scope. Counters are kept.
    pub async fn clear(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_usable(self.backend(), self.provider.is_disposed(), cancel)?;
        self.provider.clear(cancel).await
    }

    // == Stats ==
    /// Snapshot of the provider's counters and contents.
    pub async fn stats(&self, cancel: &CancellationToken) -> Result<CacheStatistics> {
        ensure_usable(self.backend(), self.provider.is_disposed(), cancel)?;
        self.provider.stats(cancel).await
    }

    /// Disposes the bound provider. Safe to call more than once.
    pub async fn dispose(&self) -> Result<()> {
        self.provider.dispose().await
    }
}
