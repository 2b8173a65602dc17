//! SQLite Provider
//!
//! Persistent provider that keeps entries in a single SQLite table so they
//! survive process restarts. Every operation opens its own short-lived
//! connection on a blocking thread; nothing is held open between calls.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::provider::{ensure_usable, run_cancellable};
use crate::cache::{
    current_timestamp_ms, expiration_after, is_expired_at, CacheProvider, CacheStatistics,
    HitCounters,
};
use crate::config::SqliteCacheConfig;
use crate::error::{Backend, CacheError, Result};
use crate::tasks::spawn_sweep_task;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache_entries (
        key        TEXT PRIMARY KEY,
        value      TEXT NOT NULL,
        expiration INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_cache_entries_expiration ON cache_entries(expiration);
";

// == SQLite Cache ==
/// File-backed provider.
///
/// Expiration is stored as Unix milliseconds. Reads delete a row they find
/// expired, and an optional background sweep deletes the rest.
pub struct SqliteCache {
    path: PathBuf,
    busy_timeout: Duration,
    default_ttl: Duration,
    counters: HitCounters,
    disposed: AtomicBool,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SqliteCache {
    // == Constructor ==
    /// Validates `config`, creates the database directory and schema, and
    /// starts the background sweep when `auto_cleanup` is set.
    ///
    /// # Errors
    /// * `CacheError::Configuration` - An option is invalid; nothing was opened
    /// * `CacheError::Connection` - The directory or database could not be created
    pub async fn open(config: SqliteCacheConfig) -> Result<Self> {
        config.validate()?;

        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CacheError::connection(
                    Backend::Sqlite,
                    format!("cannot create directory {}: {}", parent.display(), e),
                )
            })?;
        }

        blocking(config.path.clone(), config.busy_timeout, initialize_schema).await?;

        let shutdown = CancellationToken::new();
        let sweeper = if config.auto_cleanup {
            let path = config.path.clone();
            let busy_timeout = config.busy_timeout;
            Some(spawn_sweep_task(
                Backend::Sqlite,
                config.cleanup_interval,
                shutdown.clone(),
                move || blocking(path.clone(), busy_timeout, purge_expired),
            ))
        } else {
            None
        };

        info!(
            path = %config.path.display(),
            auto_cleanup = config.auto_cleanup,
            "SQLite cache initialized"
        );

        Ok(Self {
            path: config.path,
            busy_timeout: config.busy_timeout,
            default_ttl: config.default_ttl,
            counters: HitCounters::new(),
            disposed: AtomicBool::new(false),
            shutdown,
            sweeper: Mutex::new(sweeper),
        })
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `op` on a fresh connection unless disposed or cancelled.
    async fn with_connection<T, F>(&self, cancel: &CancellationToken, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        ensure_usable(Backend::Sqlite, self.is_disposed(), cancel)?;
        run_cancellable(cancel, blocking(self.path.clone(), self.busy_timeout, op)).await
    }
}

impl Drop for SqliteCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl CacheProvider for SqliteCache {
    fn backend(&self) -> Backend {
        Backend::Sqlite
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
        let key = key.to_string();
        self.with_connection(cancel, move |conn| {
            let now = current_timestamp_ms();
            let row = conn
                .query_row(
                    "SELECT value, expiration FROM cache_entries WHERE key = ?1",
                    params![key],
                    |row| {
                        let value = match row.get_ref(0)? {
                            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                                String::from_utf8(bytes.to_vec()).ok()
                            }
                            _ => None,
                        };
                        Ok((value, row.get::<_, i64>(1)?))
                    },
                )
                .optional()?;

            match row {
                None => Ok(None),
                Some((_, expiration)) if is_expired_at(expiration, now) => {
                    // Only drop the row if it is still the expired one.
                    conn.execute(
                        "DELETE FROM cache_entries WHERE key = ?1 AND expiration <= ?2",
                        params![key, now],
                    )?;
                    Ok(None)
                }
                Some((None, _)) => {
                    warn!(key = %key, "SQLite cache row holds no text payload; treating as miss");
                    Ok(None)
                }
                Some((Some(value), _)) => Ok(Some(value)),
            }
        })
        .await
    }

    async fn set_payload(
        &self,
        key: &str,
        payload: String,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let owned_key = key.to_string();
        self.with_connection(cancel, move |conn| {
            let now = current_timestamp_ms();
            conn.execute(
                "INSERT OR REPLACE INTO cache_entries (key, value, expiration, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![owned_key, payload, expiration_after(now, ttl), now],
            )?;
            Ok(())
        })
        .await?;

        debug!(key, ttl = ?ttl, "SQLite cache set");
        Ok(())
    }

    async fn remove(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        let key = key.to_string();
        self.with_connection(cancel, move |conn| {
            let now = current_timestamp_ms();
            let tx = conn.unchecked_transaction()?;
            let live = tx.execute(
                "DELETE FROM cache_entries WHERE key = ?1 AND expiration > ?2",
                params![key, now],
            )?;
            tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            tx.commit()?;
            Ok(live > 0)
        })
        .await
    }

    async fn exists(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        let key = key.to_string();
        self.with_connection(cancel, move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM cache_entries WHERE key = ?1 AND expiration > ?2)",
                params![key, current_timestamp_ms()],
                |row| row.get(0),
            )
        })
        .await
    }

    async fn clear(&self, cancel: &CancellationToken) -> Result<()> {
        let removed = self
            .with_connection(cancel, |conn| conn.execute("DELETE FROM cache_entries", []))
            .await?;

        debug!(removed, "SQLite cache cleared");
        Ok(())
    }

    async fn stats(&self, cancel: &CancellationToken) -> Result<CacheStatistics> {
        let live: i64 = self
            .with_connection(cancel, |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE expiration > ?1",
                    params![current_timestamp_ms()],
                    |row| row.get(0),
                )
            })
            .await?;

        Ok(self.counters.snapshot(live, database_size(&self.path).await))
    }

    async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.shutdown.cancel();
        if let Some(handle) = self.sweeper.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "SQLite sweep task ended abnormally");
            }
        }

        info!(path = %self.path.display(), "SQLite cache disposed");
        Ok(())
    }
}

// == Blocking Helpers ==
/// Opens a connection to `path` on a blocking thread and runs `op` on it.
async fn blocking<T, F>(path: PathBuf, busy_timeout: Duration, op: F) -> Result<T>
where
    F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let conn = open_connection(&path, busy_timeout)
            .map_err(|e| CacheError::connection(Backend::Sqlite, e))?;
        op(&conn).map_err(|e| CacheError::backend(Backend::Sqlite, e))
    })
    .await
    .map_err(|e| CacheError::backend(Backend::Sqlite, e))?
}

fn open_connection(path: &Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    conn.execute_batch(SCHEMA)
}

/// Size of the database file plus its write-ahead log, when present.
async fn database_size(path: &Path) -> Option<u64> {
    let main = tokio::fs::metadata(path).await.ok()?.len();
    let wal = tokio::fs::metadata(wal_path(path))
        .await
        .map(|m| m.len())
        .unwrap_or(0);
    Some(main + wal)
}

fn wal_path(path: &Path) -> PathBuf {
    let mut wal = path.as_os_str().to_owned();
    wal.push("-wal");
    PathBuf::from(wal)
}

/// Deletes every expired row, returning how many were removed.
fn purge_expired(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM cache_entries WHERE expiration <= ?1",
        params![current_timestamp_ms()],
    )
}
