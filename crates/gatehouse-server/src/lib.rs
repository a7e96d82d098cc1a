pub mod accounts;
pub mod backend;
pub mod boot;
pub mod cache;
pub mod config;
pub mod events;
pub mod flags;
pub mod mailing;
pub mod middleware;
pub mod observability;
pub mod preferences;
pub mod routes;
pub mod server;
pub mod visits;
pub mod workers;

use std::sync::Arc;
use std::time::Duration;

use gatehouse_auth::{IdentityProviderClient, JwtSigner, TokenValidator};
use gatehouse_core::{RefreshTokenStorage, StorageError, UserStorage, VisitStorage};
use gatehouse_db_postgres::{PostgresConfig, PostgresStorage};

pub use accounts::AccountService;
pub use backend::{BackendClient, BackendError};
pub use boot::BootAggregator;
pub use cache::{CacheBackend, CachedEntry, IdleConnectionReaper};
pub use config::{AppConfig, DatabaseBackend, DatabaseConfig, RedisConfig};
pub use events::{EventBus, InMemoryEventBus, RedisStreamBus};
pub use observability::init_tracing;
pub use server::{AppState, GatehouseServer, ServerBuilder, build_app};

/// Storage handles shared by the gateway and the workers.
#[derive(Clone)]
pub struct Storage {
    pub users: Arc<dyn UserStorage>,
    pub visits: Arc<dyn VisitStorage>,
    pub refresh_tokens: Arc<dyn RefreshTokenStorage>,
}

/// Opens the configured storage backend.
///
/// Postgres connects a pool and creates the gateway tables when missing.
pub async fn create_storage(config: &DatabaseConfig) -> Result<Storage, StorageError> {
    match config.backend {
        DatabaseBackend::Memory => {
            tracing::info!("Using in-memory storage");
            let memory = gatehouse_db_memory::create_storage();
            Ok(Storage {
                users: memory.clone(),
                visits: memory.clone(),
                refresh_tokens: memory,
            })
        }
        DatabaseBackend::Postgres => {
            tracing::info!(host = %config.host, database = %config.database, "Connecting to PostgreSQL");
            let pg_config = PostgresConfig::new(config.connection_url())
                .with_pool_size(config.pool_size)
                .with_connect_timeout_ms(config.connect_timeout_ms)
                .with_ensure_schema(true);
            let pg = Arc::new(PostgresStorage::new(pg_config).await?);
            Ok(Storage {
                users: pg.clone(),
                visits: pg.clone(),
                refresh_tokens: pg,
            })
        }
    }
}

/// Create a cache backend based on configuration.
///
/// With Redis disabled, or when the pool cannot be created or reached, the
/// process falls back to a local in-memory cache and keeps serving.
pub async fn create_cache_backend(config: &RedisConfig) -> CacheBackend {
    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return CacheBackend::new_local();
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Duration::from_millis(config.timeout_ms);
    let pool_config = redis_config.pool.get_or_insert_with(Default::default);
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return CacheBackend::new_local();
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            IdleConnectionReaper {
                pool: pool.clone(),
                idle_timeout: Duration::from_secs(config.idle_timeout_secs),
                min_idle: config.min_idle,
            }
            .start();
            CacheBackend::new_redis(pool)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to local cache."
            );
            CacheBackend::new_local()
        }
    }
}

/// Event bus over the cache's Redis pool, or an in-process recorder when
/// running on the local cache.
pub fn create_event_bus(cache: &CacheBackend) -> Arc<dyn EventBus> {
    match cache.redis_pool() {
        Some(pool) => Arc::new(RedisStreamBus::new(pool.clone())),
        None => {
            tracing::warn!("No Redis connection, published events stay in process");
            Arc::new(InMemoryEventBus::new())
        }
    }
}

/// Wires the request-path components together.
pub fn build_state(
    config: Arc<AppConfig>,
    storage: Storage,
    cache: CacheBackend,
    bus: Arc<dyn EventBus>,
) -> anyhow::Result<AppState> {
    let jwt = Arc::new(JwtSigner::new(&config.jwt));
    let provider = IdentityProviderClient::new(&config.identity_provider)?;
    let validator = Arc::new(TokenValidator::new(
        config.cookies.clone(),
        storage.refresh_tokens.clone(),
        jwt,
        provider,
    ));

    let backend = BackendClient::new(&config.api)?;
    let preferences = preferences::PreferenceStore::new(cache.clone(), backend.clone());
    let visits = visits::VisitTracker::new(storage.visits.clone(), storage.users.clone());

    let flagsmith = flags::FlagsmithClient::new(&config.flags)?;
    let cached = flags::CachedFlagProvider::new(flagsmith, cache.clone(), config.flags.cache_ttl());
    let flags = flags::FeatureFlagResolver::new(Arc::new(cached), config.flags.timeout());

    let accounts = AccountService::new(validator.clone(), storage.users.clone(), backend.clone());
    let boot = BootAggregator::new(
        validator,
        backend,
        storage.users.clone(),
        visits,
        preferences,
        flags,
        config.webapp_origin.clone(),
        config.flags.submit_article_threshold,
    );

    Ok(AppState {
        config,
        boot: Arc::new(boot),
        accounts: Arc::new(accounts),
        bus,
        cache,
    })
}
