//! Connection pool management for the PostgreSQL storage backend.

use std::time::Duration;

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{debug, info, instrument};

use crate::config::PostgresConfig;
use crate::error::Result;

/// Connections are recycled after this long even when healthy.
const MAX_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Opens the pool and checks out one connection, so a bad URL or an
/// unreachable server fails startup instead of the first request.
#[instrument(skip(config), fields(url = %mask_password(&config.url)))]
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool> {
    info!(
        pool_size = config.pool_size,
        connect_timeout_ms = config.connect_timeout_ms,
        "Opening PostgreSQL pool"
    );

    let options = PoolOptions::<Postgres>::new()
        .max_connections(config.pool_size)
        .min_connections(1)
        .max_lifetime(MAX_LIFETIME)
        .idle_timeout(config.idle_timeout_ms.map(Duration::from_millis))
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms));

    let pool = options.connect(&config.url).await?;
    debug!(size = pool.size(), "PostgreSQL pool ready");
    Ok(pool)
}

/// Masks the password in a database URL for logging.
pub(crate) fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.find('@')
        && let Some(colon_pos) = url[..at_pos].rfind(':')
    {
        let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
        if colon_pos > scheme_end {
            return format!("{}:****{}", &url[..colon_pos], &url[at_pos..]);
        }
    }
    url.to_string()
}
