//! Cache Store.
//!
//! Shared key-value cache for settings, alerts and feature flags.
//!
//! - **Redis**: pooled connections shared by every gateway instance and the
//!   worker process
//! - **Local**: DashMap fallback when Redis is disabled or unreachable
//!
//! Empty values are misses. Read errors are returned to the caller, which
//! decides whether the request degrades or the event is retried.

pub mod backend;
pub mod pattern;
pub mod reaper;

pub use backend::{CacheBackend, CachedEntry};
pub use reaper::IdleConnectionReaper;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[cfg(test)]
pub(crate) mod testing {
    use super::CacheBackend;

    /// A Redis backend whose every operation fails: nothing listens on the
    /// port, so connections are refused.
    pub(crate) fn unreachable_redis() -> CacheBackend {
        let pool = deadpool_redis::Config::from_url("redis://127.0.0.1:1")
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .expect("pool config");
        CacheBackend::new_redis(pool)
    }
}
