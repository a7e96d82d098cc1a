//! Table creation for the gateway's own data.

use sqlx_core::query::query;
use sqlx_postgres::PgPool;
use tracing::{info, instrument};

use crate::error::{PostgresError, Result};

const SCHEMA: &[(&str, &str)] = &[
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT UNIQUE,
            name TEXT,
            email TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "providers",
        r#"
        CREATE TABLE IF NOT EXISTS providers (
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            provider TEXT NOT NULL,
            PRIMARY KEY (user_id, provider)
        )
        "#,
    ),
    (
        "roles",
        r#"
        CREATE TABLE IF NOT EXISTS roles (
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            role TEXT NOT NULL,
            PRIMARY KEY (user_id, role)
        )
        "#,
    ),
    (
        "refresh_tokens",
        r#"
        CREATE TABLE IF NOT EXISTS refresh_tokens (
            token_hash TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "visits",
        r#"
        CREATE TABLE IF NOT EXISTS visits (
            user_id TEXT NOT NULL,
            app TEXT NOT NULL,
            visited_at TIMESTAMPTZ NOT NULL,
            first_visit TIMESTAMPTZ NOT NULL,
            referral TEXT,
            ip TEXT,
            PRIMARY KEY (user_id, app)
        )
        "#,
    ),
];

/// Creates the gateway tables when they do not exist yet.
#[instrument(skip(pool))]
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for (table, ddl) in SCHEMA {
        query(ddl)
            .execute(pool)
            .await
            .map_err(|e| PostgresError::Schema(format!("{table}: {e}")))?;
    }
    info!(tables = SCHEMA.len(), "Gateway schema ready");
    Ok(())
}
