//! Redis Provider
//!
//! Distributed provider that shares entries across processes through a Redis
//! server. TTLs are enforced by Redis itself. Every key is namespaced with the
//! configured prefix before it reaches the wire.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::provider::{ensure_usable, run_cancellable};
use crate::cache::{CacheProvider, CacheStatistics, HitCounters};
use crate::config::RedisCacheConfig;
use crate::error::{Backend, CacheError, Result};

/// Keys requested per SCAN round trip.
const SCAN_BATCH: usize = 500;
/// Keys deleted per DEL command during `clear`.
const DELETE_BATCH: usize = 500;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(2);
/// Longest TTL sent with PSETEX; Redis rejects expirations past its signed
/// millisecond clock.
const MAX_TTL_MS: u64 = i64::MAX as u64 / 2;

// == Connection Ownership ==
/// Whether the provider opened its connection or was handed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOwnership {
    /// Opened by [`RedisCache::connect`]; closed on dispose
    Owned,
    /// Supplied through [`RedisCache::with_connection`]; the caller keeps it open
    Borrowed,
}

// == Redis Cache ==
/// Redis-backed provider.
///
/// `clear` and `stats` enumerate only keys under this instance's prefix
/// using cursor-based `SCAN`. With an empty prefix there is no namespace to
/// scan, so both fall back to the keys this instance wrote; `stats` drops
/// the ones Redis has since expired.
pub struct RedisCache {
    connection: RwLock<Option<MultiplexedConnection>>,
    ownership: ConnectionOwnership,
    prefix: String,
    written: Mutex<HashSet<String>>,
    default_ttl: Duration,
    counters: HitCounters,
    disposed: AtomicBool,
}

impl RedisCache {
    // == Constructors ==
    /// Validates `config` and opens an owned connection.
    ///
    /// Each attempt is bounded by `connect_timeout`; failed attempts are
    /// retried `connect_retries` times with a growing pause.
    ///
    /// # Errors
    /// * `CacheError::Configuration` - An option is invalid; nothing was opened
    /// * `CacheError::Connection` - Every connection attempt failed
    pub async fn connect(config: RedisCacheConfig) -> Result<Self> {
        config.validate()?;

        let url = config.connection_url()?;
        let client = redis::Client::open(url.as_str())
            .map_err(|e| CacheError::connection(Backend::Redis, format!("invalid client: {}", e)))?;
        let connection = establish(&client, &config).await?;

        Ok(Self::build(config, connection, ConnectionOwnership::Owned))
    }

    /// Validates `config` and borrows an existing connection.
    ///
    /// Disposing the provider releases its handle but leaves the caller's
    /// connection open.
    pub fn with_connection(
        config: RedisCacheConfig,
        connection: MultiplexedConnection,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, connection, ConnectionOwnership::Borrowed))
    }

    fn build(
        config: RedisCacheConfig,
        connection: MultiplexedConnection,
        ownership: ConnectionOwnership,
    ) -> Self {
        info!(prefix = %config.key_prefix, ?ownership, "Redis cache initialized");

        Self {
            connection: RwLock::new(Some(connection)),
            ownership,
            prefix: config.key_prefix,
            written: Mutex::new(HashSet::new()),
            default_ttl: config.default_ttl,
            counters: HitCounters::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Whether dispose closes the connection.
    pub fn owns_connection(&self) -> bool {
        self.ownership == ConnectionOwnership::Owned
    }

    /// The namespace prefix applied to every key.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn namespaced(&self, key: &str) -> String {
        namespaced_key(&self.prefix, key)
    }

    /// Clones the shared connection handle unless disposed or cancelled.
    async fn connection(&self, cancel: &CancellationToken) -> Result<MultiplexedConnection> {
        ensure_usable(Backend::Redis, self.is_disposed(), cancel)?;
        self.connection
            .read()
            .await
            .clone()
            .ok_or(CacheError::Disposed(Backend::Redis))
    }

    /// Every stored key under this instance's non-empty prefix.
    async fn scan_namespace(&self, conn: &mut MultiplexedConnection) -> Result<Vec<String>> {
        let pattern = format!("{}*", escape_glob(&self.prefix));
        let mut keys = HashSet::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(conn)
                .await
                .map_err(|e| map_redis_error("SCAN", e))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys.into_iter().collect())
    }
}

#[async_trait]
impl CacheProvider for RedisCache {
    fn backend(&self) -> Backend {
        Backend::Redis
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
        let mut conn = self.connection(cancel).await?;
        let redis_key = self.namespaced(key);

        let raw: Option<Vec<u8>> = run_cancellable(cancel, async {
            conn.get::<_, Option<Vec<u8>>>(&redis_key)
                .await
                .map_err(|e| map_redis_error("GET", e))
        })
        .await?;

        Ok(raw.and_then(|bytes| match String::from_utf8(bytes) {
            Ok(payload) => Some(payload),
            Err(_) => {
                warn!(key, "Redis cache value is not UTF-8; treating as miss");
                None
            }
        }))
    }

    async fn set_payload(
        &self,
        key: &str,
        payload: String,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut conn = self.connection(cancel).await?;
        let redis_key = self.namespaced(key);
        let ttl_ms = ttl_millis(ttl);

        // Held across the write so stats never prunes a key mid-set.
        let _written = if self.prefix.is_empty() {
            let mut written = self.written.lock().await;
            written.insert(redis_key.clone());
            Some(written)
        } else {
            None
        };

        run_cancellable(cancel, async {
            conn.pset_ex::<_, _, ()>(&redis_key, payload, ttl_ms)
                .await
                .map_err(|e| map_redis_error("PSETEX", e))
        })
        .await?;

        debug!(key, ttl = ?ttl, "Redis cache set");
        Ok(())
    }

    async fn remove(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        let mut conn = self.connection(cancel).await?;
        let redis_key = self.namespaced(key);

        let removed: usize = run_cancellable(cancel, async {
            conn.del::<_, usize>(&redis_key)
                .await
                .map_err(|e| map_redis_error("DEL", e))
        })
        .await?;

        if self.prefix.is_empty() {
            self.written.lock().await.remove(&redis_key);
        }
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        let mut conn = self.connection(cancel).await?;
        let redis_key = self.namespaced(key);

        run_cancellable(cancel, async {
            conn.exists::<_, bool>(&redis_key)
                .await
                .map_err(|e| map_redis_error("EXISTS", e))
        })
        .await
    }

    async fn clear(&self, cancel: &CancellationToken) -> Result<()> {
        let mut conn = self.connection(cancel).await?;

        let removed = if self.prefix.is_empty() {
            let mut written = self.written.lock().await;
            let keys: Vec<String> = written.iter().cloned().collect();
            let removed = run_cancellable(cancel, delete_keys(&mut conn, &keys)).await?;
            written.clear();
            removed
        } else {
            run_cancellable(cancel, async {
                let keys = self.scan_namespace(&mut conn).await?;
                delete_keys(&mut conn, &keys).await
            })
            .await?
        };

        debug!(removed, prefix = %self.prefix, "Redis cache cleared");
        Ok(())
    }

    async fn stats(&self, cancel: &CancellationToken) -> Result<CacheStatistics> {
        let mut conn = self.connection(cancel).await?;

        let live = if self.prefix.is_empty() {
            let mut written = self.written.lock().await;
            run_cancellable(cancel, prune_written(&mut conn, &mut written)).await?
        } else {
            run_cancellable(cancel, async {
                Ok(self.scan_namespace(&mut conn).await?.len())
            })
            .await?
        };

        Ok(self.counters.snapshot(live as i64, None))
    }

    async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let connection = self.connection.write().await.take();
        self.written.lock().await.clear();
        // Dropping the last handle of an owned multiplexed connection closes it.
        drop(connection);

        match self.ownership {
            ConnectionOwnership::Owned => info!("Redis cache disposed; connection closed"),
            ConnectionOwnership::Borrowed => {
                info!("Redis cache disposed; borrowed connection left open")
            }
        }
        Ok(())
    }
}

// == Connection Helpers ==
async fn establish(
    client: &redis::Client,
    config: &RedisCacheConfig,
) -> Result<MultiplexedConnection> {
    let mut attempt: u32 = 0;
    loop {
        let failure = match tokio::time::timeout(
            config.connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(connection)) => return Ok(connection),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", config.connect_timeout),
        };

        if attempt >= config.connect_retries {
            return Err(CacheError::connection(
                Backend::Redis,
                format!("giving up after {} attempt(s): {}", attempt + 1, failure),
            ));
        }

        attempt += 1;
        let backoff = (RETRY_BACKOFF * attempt).min(MAX_RETRY_BACKOFF);
        warn!(attempt, error = %failure, ?backoff, "Redis connection attempt failed; retrying");
        tokio::time::sleep(backoff).await;
    }
}

// == Key Helpers ==
async fn delete_keys(conn: &mut MultiplexedConnection, keys: &[String]) -> Result<usize> {
    let mut removed = 0usize;
    for chunk in keys.chunks(DELETE_BATCH) {
        let deleted: usize = conn
            .del::<_, usize>(chunk.to_vec())
            .await
            .map_err(|e| map_redis_error("DEL", e))?;
        removed += deleted;
    }
    Ok(removed)
}

/// Forgets written keys Redis no longer holds, returning how many remain.
async fn prune_written(
    conn: &mut MultiplexedConnection,
    written: &mut HashSet<String>,
) -> Result<usize> {
    let keys: Vec<String> = written.iter().cloned().collect();
    for chunk in keys.chunks(SCAN_BATCH) {
        let mut pipe = redis::pipe();
        for key in chunk {
            pipe.exists(key);
        }
        let present: Vec<bool> = pipe
            .query_async(conn)
            .await
            .map_err(|e| map_redis_error("EXISTS", e))?;
        for (key, present) in chunk.iter().zip(present) {
            if !present {
                written.remove(key);
            }
        }
    }
    Ok(written.len())
}

/// PSETEX milliseconds for `ttl`, at least one and never past `MAX_TTL_MS`.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis())
        .unwrap_or(u64::MAX)
        .clamp(1, MAX_TTL_MS)
}

/// Folds a client error into the cache error taxonomy.
fn map_redis_error(command: &str, e: RedisError) -> CacheError {
    let message = format!("{} failed: {}", command, e);
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        CacheError::connection(Backend::Redis, message)
    } else {
        CacheError::backend(Backend::Redis, message)
    }
}

fn namespaced_key(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

/// Escapes Redis glob metacharacters so a prefix matches only itself.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
