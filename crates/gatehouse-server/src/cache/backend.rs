//! Cache backend with a local (DashMap) and a shared (Redis) variant.

use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::CacheError;
use super::pattern;

/// Keys requested per SCAN round trip.
const SCAN_BATCH: usize = 100;

/// A cached entry with TTL support.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<str>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: &str, ttl: Duration) -> Self {
        Self {
            data: Arc::from(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Cache backend.
///
/// ## Cache Modes
///
/// - **Local**: single instance, entries live in process memory
/// - **Redis**: shared store, visible to every instance and to the workers
///
/// Both variants are cheap to clone and safe for unordered concurrent use.
#[derive(Clone)]
pub enum CacheBackend {
    Local(Arc<DashMap<String, CachedEntry>>),
    Redis(Pool),
}

impl CacheBackend {
    pub fn new_local() -> Self {
        CacheBackend::Local(Arc::new(DashMap::new()))
    }

    pub fn new_redis(pool: Pool) -> Self {
        CacheBackend::Redis(pool)
    }

    /// Get a value. Absent, expired and empty values are all `None`.
    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value = match self {
            CacheBackend::Local(map) => {
                let entry = map.get(key).map(|e| e.clone());
                match entry {
                    Some(entry) if entry.is_expired() => {
                        map.remove(key);
                        None
                    }
                    Some(entry) => Some(entry.data.to_string()),
                    None => None,
                }
            }
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                conn.get::<_, Option<String>>(key).await?
            }
        };

        let value = value.filter(|v| !v.is_empty());
        tracing::debug!(key = %key, hit = value.is_some(), "cache get");
        Ok(value)
    }

    /// Set a value that expires after `ttl`.
    pub async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        match self {
            CacheBackend::Local(map) => {
                map.insert(key.to_string(), CachedEntry::new(value, ttl));
            }
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                    .await?;
            }
        }
        tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set");
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match self {
            CacheBackend::Local(map) => {
                map.remove(key);
            }
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                conn.del::<_, ()>(key).await?;
            }
        }
        Ok(())
    }

    /// Unlinks every key matching the glob `pattern`, one SCAN batch at a
    /// time. Returns the number of keys removed.
    ///
    /// Walks the whole keyspace; keep it off the request path.
    pub async fn delete_by_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let removed = match self {
            CacheBackend::Local(map) => {
                let before = map.len();
                map.retain(|key, _| !pattern::matches(pattern, key));
                before.saturating_sub(map.len())
            }
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                let mut cursor: u64 = 0;
                let mut removed = 0;
                loop {
                    let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut *conn)
                        .await?;
                    if !keys.is_empty() {
                        let unlinked: usize = redis::cmd("UNLINK")
                            .arg(&keys)
                            .query_async(&mut *conn)
                            .await?;
                        removed += unlinked;
                    }
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                removed
            }
        };
        tracing::info!(pattern = %pattern, removed, "cache keys deleted by pattern");
        Ok(removed)
    }

    /// Counts keys matching the glob `pattern`.
    pub async fn count_by_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        match self {
            CacheBackend::Local(map) => Ok(map
                .iter()
                .filter(|e| !e.value().is_expired() && pattern::matches(pattern, e.key()))
                .count()),
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await?;
                let mut cursor: u64 = 0;
                let mut count = 0;
                loop {
                    let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut *conn)
                        .await?;
                    count += keys.len();
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                Ok(count)
            }
        }
    }

    /// Health check. The local backend is always available.
    pub async fn is_available(&self) -> bool {
        match self {
            CacheBackend::Local(_) => true,
            CacheBackend::Redis(pool) => {
                let Ok(mut conn) = pool.get().await else {
                    return false;
                };
                let pong: Result<String, _> = redis::cmd("PING").query_async(&mut *conn).await;
                pong.is_ok()
            }
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            CacheBackend::Local(_) => "local",
            CacheBackend::Redis(_) => "redis",
        }
    }

    pub fn redis_pool(&self) -> Option<&Pool> {
        match self {
            CacheBackend::Local(_) => None,
            CacheBackend::Redis(pool) => Some(pool),
        }
    }
}
