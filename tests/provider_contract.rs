//! Integration Tests for the Provider Contract
//!
//! Runs the same scripts against every backend and checks they are
//! indistinguishable through the public API. Redis cases need a live server
//! at `REDIS_URL` and are ignored by default.

use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use profile_cache::{
    Cache, CacheConfig, CacheError, CancellationToken, MemoryCache, MemoryCacheConfig,
    RedisCache, RedisCacheConfig, SqliteCache, SqliteCacheConfig,
};

// == Helper Functions ==

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: String,
    name: String,
    level: u32,
}

fn profile(id: &str, level: u32) -> Profile {
    Profile {
        id: id.to_string(),
        name: format!("player-{}", id),
        level,
    }
}

fn memory_cache() -> Result<Cache> {
    Ok(Cache::new(Arc::new(MemoryCache::new(MemoryCacheConfig::default())?)))
}

/// The returned directory must outlive the cache.
async fn sqlite_cache() -> Result<(Cache, TempDir)> {
    let dir = tempfile::tempdir()?;
    let config = SqliteCacheConfig::new(dir.path().join("profiles.db"));
    let cache = Cache::new(Arc::new(SqliteCache::open(config).await?));
    Ok((cache, dir))
}

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn redis_cache(prefix: &str) -> Result<Cache> {
    let config = RedisCacheConfig::new(redis_url()).with_prefix(prefix);
    Ok(Cache::new(Arc::new(RedisCache::connect(config).await?)))
}

/// Everything a script observed, compared across backends.
#[derive(Debug, PartialEq)]
struct Transcript {
    reads: Vec<Option<Profile>>,
    flags: Vec<bool>,
    hits: u64,
    misses: u64,
    entries: i64,
}

async fn run_script(cache: &Cache) -> Result<Transcript> {
    let cancel = CancellationToken::new();
    let mut reads = Vec::new();
    let mut flags = Vec::new();

    reads.push(cache.get::<Profile>("player:1", &cancel).await?);
    cache.set("player:1", &profile("1", 10), None, &cancel).await?;
    cache.set("player:2", &profile("2", 20), None, &cancel).await?;
    reads.push(cache.get("player:1", &cancel).await?);
    cache.set("player:1", &profile("1", 11), None, &cancel).await?;
    reads.push(cache.get("player:1", &cancel).await?);
    flags.push(cache.exists("player:2", &cancel).await?);
    flags.push(cache.remove("player:2", &cancel).await?);
    flags.push(cache.remove("player:2", &cancel).await?);
    flags.push(cache.exists("player:2", &cancel).await?);
    reads.push(cache.get("player:2", &cancel).await?);
    cache.set("player:3", &profile("3", 30), None, &cancel).await?;

    let stats = cache.stats(&cancel).await?;
    Ok(Transcript {
        reads,
        flags,
        hits: stats.hit_count,
        misses: stats.miss_count,
        entries: stats.entry_count,
    })
}

async fn assert_expires(cache: &Cache) -> Result<()> {
    let cancel = CancellationToken::new();
    cache
        .set("player:short", &profile("s", 1), Some(Duration::from_millis(100)), &cancel)
        .await?;
    assert!(cache.exists("player:short", &cancel).await?);

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(cache.get::<Profile>("player:short", &cancel).await?.is_none());
    assert!(!cache.exists("player:short", &cancel).await?);
    assert_eq!(cache.stats(&cancel).await?.entry_count, 0);
    Ok(())
}

async fn assert_clear_is_complete(cache: &Cache) -> Result<()> {
    let cancel = CancellationToken::new();
    for i in 0..25 {
        cache.set(&format!("player:{}", i), &profile(&i.to_string(), i), None, &cancel).await?;
    }
    let _: Option<Profile> = cache.get("player:0", &cancel).await?;

    cache.clear(&cancel).await?;

    for i in 0..25 {
        assert!(!cache.exists(&format!("player:{}", i), &cancel).await?);
    }
    let stats = cache.stats(&cancel).await?;
    assert_eq!(stats.entry_count, 0);
    assert_eq!(stats.hit_count, 1, "clear must not reset counters");
    Ok(())
}

// == Interchangeability ==

#[tokio::test]
async fn test_memory_and_sqlite_are_indistinguishable() -> Result<()> {
    init_tracing();
    let memory = memory_cache()?;
    let (sqlite, _dir) = sqlite_cache().await?;

    let from_memory = run_script(&memory).await?;
    let from_sqlite = run_script(&sqlite).await?;

    assert_eq!(from_memory, from_sqlite);
    assert_eq!(
        from_memory.reads,
        vec![None, Some(profile("1", 10)), Some(profile("1", 11)), None]
    );
    assert_eq!(from_memory.flags, vec![true, true, false, false]);
    assert_eq!((from_memory.hits, from_memory.misses), (2, 2));
    assert_eq!(from_memory.entries, 2);

    sqlite.dispose().await?;
    Ok(())
}

#[tokio::test]
async fn test_profile_round_trip_and_stats() -> Result<()> {
    init_tracing();
    let cache = memory_cache()?;
    let cancel = CancellationToken::new();

    cache
        .set("player:123", &profile("123", 42), Some(Duration::from_secs(300)), &cancel)
        .await?;
    let cached: Option<Profile> = cache.get("player:123", &cancel).await?;
    assert_eq!(cached, Some(profile("123", 42)));

    let missing: Option<Profile> = cache.get("player:999", &cancel).await?;
    assert!(missing.is_none());

    let stats = cache.stats(&cancel).await?;
    assert_eq!(stats.hit_count, 1);
    assert_eq!(stats.miss_count, 1);
    assert_eq!(stats.entry_count, 1);
    assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    Ok(())
}

// == Expiration ==

#[tokio::test]
async fn test_memory_entries_expire() -> Result<()> {
    init_tracing();
    assert_expires(&memory_cache()?).await
}

#[tokio::test]
async fn test_sqlite_entries_expire() -> Result<()> {
    init_tracing();
    let (cache, _dir) = sqlite_cache().await?;
    assert_expires(&cache).await?;
    cache.dispose().await?;
    Ok(())
}

#[tokio::test]
async fn test_extreme_ttl_is_accepted_everywhere() -> Result<()> {
    init_tracing();
    let (sqlite, _dir) = sqlite_cache().await?;
    let forever = Some(Duration::from_secs(u64::MAX));

    for cache in [memory_cache()?, sqlite] {
        let cancel = CancellationToken::new();
        cache.set("player:forever", &profile("f", 1), forever, &cancel).await?;

        let cached: Option<Profile> = cache.get("player:forever", &cancel).await?;
        assert_eq!(cached, Some(profile("f", 1)));
        assert_eq!(cache.stats(&cancel).await?.entry_count, 1);
        cache.dispose().await?;
    }
    Ok(())
}

// == Clear ==

#[tokio::test]
async fn test_memory_clear_is_complete() -> Result<()> {
    init_tracing();
    assert_clear_is_complete(&memory_cache()?).await
}

#[tokio::test]
async fn test_sqlite_clear_is_complete() -> Result<()> {
    init_tracing();
    let (cache, _dir) = sqlite_cache().await?;
    assert_clear_is_complete(&cache).await?;
    cache.dispose().await?;
    Ok(())
}

// == Persistence ==

#[tokio::test]
async fn test_sqlite_survives_reopen() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = CacheConfig::Sqlite(SqliteCacheConfig::new(dir.path().join("profiles.db")));
    let cancel = CancellationToken::new();

    let first = Cache::from_config(&config).await?;
    first.set("player:7", &profile("7", 70), None, &cancel).await?;
    first.dispose().await?;

    let second = Cache::from_config(&config).await?;
    let cached: Option<Profile> = second.get("player:7", &cancel).await?;
    assert_eq!(cached, Some(profile("7", 70)));
    second.dispose().await?;
    Ok(())
}

// == Cancellation and Disposal ==

#[tokio::test]
async fn test_cancelled_calls_fail_without_side_effects() -> Result<()> {
    init_tracing();
    let (sqlite, _dir) = sqlite_cache().await?;

    for cache in [memory_cache()?, sqlite] {
        let cancel = CancellationToken::new();
        let cancelled = CancellationToken::new();
        cancelled.cancel();

        let result = cache.set("player:1", &profile("1", 1), None, &cancelled).await;
        assert!(matches!(assert_err!(result), CacheError::Cancelled));
        let result = cache.get::<Profile>("player:1", &cancelled).await;
        assert!(assert_err!(result).is_cancelled());

        assert!(!cache.exists("player:1", &cancel).await?);
        assert_eq!(cache.stats(&cancel).await?.total_requests(), 0);
        cache.dispose().await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_disposed_cache_rejects_operations() -> Result<()> {
    init_tracing();
    let (cache, _dir) = sqlite_cache().await?;
    let cancel = CancellationToken::new();

    assert_ok!(cache.dispose().await);
    assert_ok!(cache.dispose().await);

    let result = cache.exists("player:1", &cancel).await;
    assert!(matches!(assert_err!(result), CacheError::Disposed(_)));
    Ok(())
}

// == Configuration ==

#[tokio::test]
async fn test_invalid_configuration_is_rejected_before_use() {
    init_tracing();

    let sqlite = CacheConfig::Sqlite(SqliteCacheConfig::new(":memory:"));
    assert!(matches!(
        Cache::from_config(&sqlite).await,
        Err(CacheError::Configuration { field: "path", .. })
    ));

    let redis = CacheConfig::Redis(RedisCacheConfig::new("localhost:99999"));
    assert!(matches!(
        Cache::from_config(&redis).await,
        Err(CacheError::Configuration { .. })
    ));
}

// == Redis ==

#[tokio::test]
#[ignore = "requires a running Redis server at REDIS_URL"]
async fn test_redis_matches_memory() -> Result<()> {
    init_tracing();
    let redis = redis_cache("contract-script:").await?;
    let cancel = CancellationToken::new();
    redis.clear(&cancel).await?;

    let from_memory = run_script(&memory_cache()?).await?;
    let from_redis = run_script(&redis).await?;
    assert_eq!(from_memory, from_redis);

    redis.clear(&cancel).await?;
    redis.dispose().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis server at REDIS_URL"]
async fn test_redis_accepts_extreme_ttl() -> Result<()> {
    init_tracing();
    let redis = redis_cache("contract-forever:").await?;
    let cancel = CancellationToken::new();

    let forever = Some(Duration::from_secs(u64::MAX));
    redis.set("player:forever", &profile("f", 1), forever, &cancel).await?;
    let cached: Option<Profile> = redis.get("player:forever", &cancel).await?;
    assert_eq!(cached, Some(profile("f", 1)));

    redis.clear(&cancel).await?;
    redis.dispose().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis server at REDIS_URL"]
async fn test_redis_entries_expire() -> Result<()> {
    init_tracing();
    let redis = redis_cache("contract-expiry:").await?;
    redis.clear(&CancellationToken::new()).await?;
    assert_expires(&redis).await?;
    redis.dispose().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis server at REDIS_URL"]
async fn test_redis_prefixes_isolate_instances() -> Result<()> {
    init_tracing();
    let alpha = redis_cache("contract-alpha:").await?;
    let beta = redis_cache("contract-beta:").await?;
    let cancel = CancellationToken::new();
    alpha.clear(&cancel).await?;
    beta.clear(&cancel).await?;

    alpha.set("player:1", &profile("1", 1), None, &cancel).await?;
    beta.set("player:1", &profile("1", 2), None, &cancel).await?;

    let from_alpha: Option<Profile> = alpha.get("player:1", &cancel).await?;
    assert_eq!(from_alpha, Some(profile("1", 1)));

    alpha.clear(&cancel).await?;
    assert!(!alpha.exists("player:1", &cancel).await?);
    let from_beta: Option<Profile> = beta.get("player:1", &cancel).await?;
    assert_eq!(from_beta, Some(profile("1", 2)));
    assert_eq!(beta.stats(&cancel).await?.entry_count, 1);

    beta.clear(&cancel).await?;
    alpha.dispose().await?;
    beta.dispose().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running Redis server at REDIS_URL"]
async fn test_redis_without_prefix_tracks_only_its_own_keys() -> Result<()> {
    init_tracing();
    let owner = redis_cache("").await?;
    let other = redis_cache("").await?;
    let cancel = CancellationToken::new();

    for i in 0..3 {
        let key = format!("contract-noprefix:own:{}", i);
        owner.set(&key, &profile(&i.to_string(), i), None, &cancel).await?;
    }
    other.set("contract-noprefix:other", &profile("x", 9), None, &cancel).await?;
    assert_eq!(owner.stats(&cancel).await?.entry_count, 3);

    owner.clear(&cancel).await?;
    assert!(!owner.exists("contract-noprefix:own:0", &cancel).await?);
    assert!(owner.exists("contract-noprefix:other", &cancel).await?);
    assert_eq!(owner.stats(&cancel).await?.entry_count, 0);

    let short = Some(Duration::from_millis(100));
    owner.set("contract-noprefix:short", &profile("s", 1), short, &cancel).await?;
    owner.set("contract-noprefix:long", &profile("l", 2), None, &cancel).await?;
    assert_eq!(owner.stats(&cancel).await?.entry_count, 2);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(owner.stats(&cancel).await?.entry_count, 1);

    owner.clear(&cancel).await?;
    assert!(other.remove("contract-noprefix:other", &cancel).await?);
    owner.dispose().await?;
    other.dispose().await?;
    Ok(())
}
