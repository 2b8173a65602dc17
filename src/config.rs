//! Configuration Module
//!
//! Per-backend option structs, their validation, and loading from environment
//! variables. Validation runs once, inside each provider constructor, before
//! any file or socket is opened.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{Backend, CacheError, Result};

// == Defaults ==
/// Default TTL applied when `set` is called without one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
/// Default interval between background sweeps of the SQLite file.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
/// Default time a SQLite connection waits on a locked database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// Default bound on a single Redis connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default number of extra Redis connection attempts.
pub const DEFAULT_CONNECT_RETRIES: u32 = 3;

const DEFAULT_SQLITE_PATH: &str = "cache/profile_cache.db";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

// == Memory ==
/// Options for the in-process volatile provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCacheConfig {
    /// TTL used when `set` is called without one
    pub default_ttl: Duration,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
        }
    }
}

impl MemoryCacheConfig {
    /// Checks every option, failing on the first invalid one.
    pub fn validate(&self) -> Result<()> {
        validate_ttl(Backend::Memory, self.default_ttl)
    }
}

// == SQLite ==
/// Options for the persistent file-backed provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteCacheConfig {
    /// Database file; the containing directory is created if missing
    pub path: PathBuf,
    /// TTL used when `set` is called without one
    pub default_ttl: Duration,
    /// Whether a background task periodically deletes expired rows
    pub auto_cleanup: bool,
    /// Interval between background sweeps
    pub cleanup_interval: Duration,
    /// How long each short-lived connection waits on a locked database
    pub busy_timeout: Duration,
}

impl Default for SqliteCacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_SQLITE_PATH),
            default_ttl: DEFAULT_TTL,
            auto_cleanup: true,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl SqliteCacheConfig {
    /// Creates a config for `path` with every other option defaulted.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Checks every option, failing on the first invalid one.
    pub fn validate(&self) -> Result<()> {
        let path = self.path.as_os_str().to_string_lossy();
        if path.trim().is_empty() {
            return Err(CacheError::configuration(
                Backend::Sqlite,
                "path",
                "must not be empty",
            ));
        }
        // Each operation opens its own connection, so an in-memory database
        // would be a fresh empty one every time.
        if path.trim() == ":memory:" {
            return Err(CacheError::configuration(
                Backend::Sqlite,
                "path",
                "must name a file, not `:memory:`",
            ));
        }
        validate_ttl(Backend::Sqlite, self.default_ttl)?;
        // A zero interval is only meaningful when nothing is scheduled.
        if self.auto_cleanup && self.cleanup_interval.is_zero() {
            return Err(CacheError::configuration(
                Backend::Sqlite,
                "cleanup_interval",
                "must be positive when auto_cleanup is enabled",
            ));
        }
        Ok(())
    }
}

// == Redis ==
/// Options for the networked distributed provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisCacheConfig {
    /// `redis://host:port/db`, `rediss://...`, `redis+unix://...` or bare `host:port`
    pub connection_string: String,
    /// TTL used when `set` is called without one
    pub default_ttl: Duration,
    /// Prepended to every key; empty means no namespace isolation
    pub key_prefix: String,
    /// Extra connection attempts after the first one fails
    pub connect_retries: u32,
    /// Bound on each connection attempt
    pub connect_timeout: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            connection_string: DEFAULT_REDIS_URL.to_string(),
            default_ttl: DEFAULT_TTL,
            key_prefix: String::new(),
            connect_retries: DEFAULT_CONNECT_RETRIES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl RedisCacheConfig {
    /// Creates a config for `connection_string` with every other option defaulted.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Self::default()
        }
    }

    /// Sets the key namespace prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Checks every option, failing on the first invalid one.
    pub fn validate(&self) -> Result<()> {
        self.connection_url()?;
        validate_ttl(Backend::Redis, self.default_ttl)?;
        if self.connect_timeout.is_zero() {
            return Err(CacheError::configuration(
                Backend::Redis,
                "connect_timeout",
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Normalizes the connection string into a URL the Redis client accepts.
    ///
    /// Bare `host:port` strings become `redis://host:port`. Any explicit
    /// port must fall within 1-65535.
    pub fn connection_url(&self) -> Result<String> {
        let raw = self.connection_string.trim();
        if raw.is_empty() {
            return Err(invalid_connection_string("must not be empty"));
        }

        if raw.contains("://") {
            let url = Url::parse(raw)
                .map_err(|e| invalid_connection_string(format!("is not a valid URL: {}", e)))?;
            match url.scheme() {
                "redis" | "rediss" => {
                    if url.host_str().map_or(true, str::is_empty) {
                        return Err(invalid_connection_string("has no host"));
                    }
                    if url.port() == Some(0) {
                        return Err(invalid_connection_string("port must be within 1-65535"));
                    }
                }
                "redis+unix" | "unix" => {}
                other => {
                    return Err(invalid_connection_string(format!(
                        "uses unsupported scheme `{}`",
                        other
                    )))
                }
            }
            return Ok(raw.to_string());
        }

        let (host, port) = match raw.rsplit_once(':') {
            Some((host, port)) => {
                let port: u32 = port.parse().map_err(|_| {
                    invalid_connection_string(format!("has invalid port `{}`", port))
                })?;
                if !(1..=65535).contains(&port) {
                    return Err(invalid_connection_string("port must be within 1-65535"));
                }
                (host, Some(port))
            }
            None => (raw, None),
        };
        if host.trim().is_empty() {
            return Err(invalid_connection_string("has no host"));
        }

        Ok(match port {
            Some(port) => format!("redis://{}:{}", host, port),
            None => format!("redis://{}", host),
        })
    }
}

// == Backend Selection ==
/// Selects which provider `Cache::from_config` binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheConfig {
    Memory(MemoryCacheConfig),
    Sqlite(SqliteCacheConfig),
    Redis(RedisCacheConfig),
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::Memory(MemoryCacheConfig::default())
    }
}

impl CacheConfig {
    /// The backend this configuration binds.
    pub fn backend(&self) -> Backend {
        match self {
            CacheConfig::Memory(_) => Backend::Memory,
            CacheConfig::Sqlite(_) => Backend::Sqlite,
            CacheConfig::Redis(_) => Backend::Redis,
        }
    }

    /// Validates the selected backend's options.
    pub fn validate(&self) -> Result<()> {
        match self {
            CacheConfig::Memory(config) => config.validate(),
            CacheConfig::Sqlite(config) => config.validate(),
            CacheConfig::Redis(config) => config.validate(),
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_BACKEND` - `memory`, `sqlite` or `redis` (default: memory)
    /// - `CACHE_DEFAULT_TTL_SECS` - Default TTL in seconds (default: 300)
    /// - `CACHE_SQLITE_PATH` - Database file (default: cache/profile_cache.db)
    /// - `CACHE_SQLITE_AUTO_CLEANUP` - Background sweep on/off (default: true)
    /// - `CACHE_SQLITE_CLEANUP_INTERVAL_SECS` - Sweep interval (default: 60)
    /// - `CACHE_REDIS_URL` - Connection string (default: redis://127.0.0.1:6379)
    /// - `CACHE_REDIS_PREFIX` - Key namespace prefix (default: empty)
    /// - `CACHE_REDIS_CONNECT_RETRIES` - Extra connect attempts (default: 3)
    /// - `CACHE_REDIS_CONNECT_TIMEOUT_MS` - Per-attempt bound (default: 5000)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`CacheConfig::from_env`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = lookup("CACHE_BACKEND").unwrap_or_else(|| "memory".to_string());

        let config = match backend.trim().to_ascii_lowercase().as_str() {
            "memory" => {
                let default_ttl = parse_secs(
                    &lookup,
                    "CACHE_DEFAULT_TTL_SECS",
                    Backend::Memory,
                    "default_ttl",
                    DEFAULT_TTL,
                )?;
                CacheConfig::Memory(MemoryCacheConfig { default_ttl })
            }
            "sqlite" => {
                let defaults = SqliteCacheConfig::default();
                CacheConfig::Sqlite(SqliteCacheConfig {
                    path: lookup("CACHE_SQLITE_PATH")
                        .map(PathBuf::from)
                        .unwrap_or(defaults.path),
                    default_ttl: parse_secs(
                        &lookup,
                        "CACHE_DEFAULT_TTL_SECS",
                        Backend::Sqlite,
                        "default_ttl",
                        defaults.default_ttl,
                    )?,
                    auto_cleanup: parse_var(
                        &lookup,
                        "CACHE_SQLITE_AUTO_CLEANUP",
                        Backend::Sqlite,
                        "auto_cleanup",
                        defaults.auto_cleanup,
                    )?,
                    cleanup_interval: parse_secs(
                        &lookup,
                        "CACHE_SQLITE_CLEANUP_INTERVAL_SECS",
                        Backend::Sqlite,
                        "cleanup_interval",
                        defaults.cleanup_interval,
                    )?,
                    busy_timeout: defaults.busy_timeout,
                })
            }
            "redis" => {
                let defaults = RedisCacheConfig::default();
                let timeout_ms = parse_var(
                    &lookup,
                    "CACHE_REDIS_CONNECT_TIMEOUT_MS",
                    Backend::Redis,
                    "connect_timeout",
                    defaults.connect_timeout.as_millis() as u64,
                )?;
                CacheConfig::Redis(RedisCacheConfig {
                    connection_string: lookup("CACHE_REDIS_URL")
                        .unwrap_or(defaults.connection_string),
                    default_ttl: parse_secs(
                        &lookup,
                        "CACHE_DEFAULT_TTL_SECS",
                        Backend::Redis,
                        "default_ttl",
                        defaults.default_ttl,
                    )?,
                    key_prefix: lookup("CACHE_REDIS_PREFIX").unwrap_or(defaults.key_prefix),
                    connect_retries: parse_var(
                        &lookup,
                        "CACHE_REDIS_CONNECT_RETRIES",
                        Backend::Redis,
                        "connect_retries",
                        defaults.connect_retries,
                    )?,
                    connect_timeout: Duration::from_millis(timeout_ms),
                })
            }
            other => {
                return Err(CacheError::configuration(
                    Backend::Memory,
                    "backend",
                    format!("`{}` is not one of memory, sqlite, redis", other),
                ))
            }
        };

        config.validate()?;
        Ok(config)
    }
}

// == Helpers ==
fn validate_ttl(backend: Backend, ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(CacheError::configuration(
            backend,
            "default_ttl",
            "must be positive",
        ));
    }
    Ok(())
}

fn invalid_connection_string(reason: impl Into<String>) -> CacheError {
    CacheError::configuration(Backend::Redis, "connection_string", reason)
}

fn parse_var<F, T>(
    lookup: &F,
    name: &str,
    backend: Backend,
    field: &'static str,
    default: T,
) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            CacheError::configuration(backend, field, format!("cannot parse {}=`{}`", name, raw))
        }),
        None => Ok(default),
    }
}

fn parse_secs<F>(
    lookup: &F,
    name: &str,
    backend: Backend,
    field: &'static str,
    default: Duration,
) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var(lookup, name, backend, field, default.as_secs()).map(Duration::from_secs)
}
