//! Storage trait implementations backed by PostgreSQL.

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgPool;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use gatehouse_core::{
    FirstVisit, GatewayUser, RefreshTokenStorage, StorageResult, UserStorage, VisitRecord,
    VisitStorage, hash_token,
};

use crate::config::PostgresConfig;
use crate::error::{Result, db_err};
use crate::pool::create_pool;
use crate::schema::ensure_schema;

type UserRow = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    OffsetDateTime,
);

type VisitRow = (
    String,
    String,
    OffsetDateTime,
    OffsetDateTime,
    Option<String>,
    Option<String>,
);

fn user_from_row(row: UserRow) -> GatewayUser {
    let (id, username, name, email, created_at) = row;
    GatewayUser {
        id,
        username,
        name,
        email,
        created_at,
    }
}

fn visit_from_row(row: VisitRow) -> VisitRecord {
    let (tracking_id, app, visited_at, first_visit, referral, ip) = row;
    VisitRecord {
        tracking_id,
        app,
        visited_at,
        first_visit,
        referral,
        ip,
    }
}

/// PostgreSQL-backed storage for users, refresh tokens and visits.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connects a pool and, when configured, creates the tables.
    pub async fn new(config: PostgresConfig) -> Result<Self> {
        let pool = create_pool(&config).await?;
        if config.ensure_schema {
            ensure_schema(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        ensure_schema(&self.pool).await
    }
}

#[async_trait]
impl UserStorage for PostgresStorage {
    #[instrument(skip(self))]
    async fn get_by_id_or_username(
        &self,
        id_or_username: &str,
    ) -> StorageResult<Option<GatewayUser>> {
        let row: Option<UserRow> = query_as(
            r#"
            SELECT id, username, name, email, created_at
            FROM users
            WHERE id = $1 OR username = $1
            ORDER BY (id = $1) DESC
            LIMIT 1
            "#,
        )
        .bind(id_or_username)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(user_from_row))
    }

    #[instrument(skip(self))]
    async fn providers(&self, user_id: &str) -> StorageResult<Vec<String>> {
        query_scalar("SELECT provider FROM providers WHERE user_id = $1 ORDER BY provider")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    #[instrument(skip(self))]
    async fn roles(&self, user_id: &str) -> StorageResult<Vec<String>> {
        query_scalar("SELECT role FROM roles WHERE user_id = $1 ORDER BY role")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    #[instrument(skip(self))]
    async fn delete_account(&self, user_id: &str) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for statement in [
            "DELETE FROM providers WHERE user_id = $1",
            "DELETE FROM roles WHERE user_id = $1",
            "DELETE FROM refresh_tokens WHERE user_id = $1",
            "DELETE FROM users WHERE id = $1",
        ] {
            query(statement)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        debug!(user_id, "Deleted gateway account");
        Ok(())
    }

    /// Round-trips a trivial query.
    async fn ping(&self) -> StorageResult<()> {
        let _: i32 = query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStorage for PostgresStorage {
    #[instrument(skip(self, token))]
    async fn create(&self, user_id: &str, token: &str) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO refresh_tokens (token_hash, user_id)
            VALUES ($1, $2)
            ON CONFLICT (token_hash) DO NOTHING
            "#,
        )
        .bind(hash_token(token))
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self, token))]
    async fn find_user_id(&self, token: &str) -> StorageResult<Option<String>> {
        query_scalar("SELECT user_id FROM refresh_tokens WHERE token_hash = $1")
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }
}

#[async_trait]
impl VisitStorage for PostgresStorage {
    #[instrument(skip(self))]
    async fn first_visit_and_referral(
        &self,
        tracking_id: &str,
    ) -> StorageResult<Option<FirstVisit>> {
        let row: Option<(OffsetDateTime, Option<String>)> = query_as(
            r#"
            SELECT first_visit, referral
            FROM visits
            WHERE user_id = $1
            ORDER BY first_visit ASC
            LIMIT 1
            "#,
        )
        .bind(tracking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|(first_visit, referral)| FirstVisit {
            first_visit,
            referral,
        }))
    }

    #[instrument(skip(self))]
    async fn get(&self, tracking_id: &str, app: &str) -> StorageResult<Option<VisitRecord>> {
        let row: Option<VisitRow> = query_as(
            r#"
            SELECT user_id, app, visited_at, first_visit, referral, ip
            FROM visits
            WHERE user_id = $1 AND app = $2
            "#,
        )
        .bind(tracking_id)
        .bind(app)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(visit_from_row))
    }

    #[instrument(skip(self, record), fields(tracking_id = %record.tracking_id, app = %record.app))]
    async fn upsert(&self, record: &VisitRecord) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO visits (user_id, app, visited_at, first_visit, referral, ip)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, app) DO UPDATE
            SET visited_at = EXCLUDED.visited_at, ip = EXCLUDED.ip
            "#,
        )
        .bind(&record.tracking_id)
        .bind(&record.app)
        .bind(record.visited_at)
        .bind(record.first_visit)
        .bind(&record.referral)
        .bind(&record.ip)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn rows_map_to_domain_types() {
        let user = user_from_row((
            "1".into(),
            Some("idoshamun".into()),
            None,
            Some("ido@daily.dev".into()),
            datetime!(2020-01-01 00:00:00 UTC),
        ));
        assert!(user.matches("idoshamun"));
        assert_eq!(user.email.as_deref(), Some("ido@daily.dev"));

        let visit = visit_from_row((
            "t1".into(),
            "web".into(),
            datetime!(2021-01-01 00:00:00 UTC),
            datetime!(2020-01-01 00:00:00 UTC),
            Some("1".into()),
            None,
        ));
        assert_eq!(visit.tracking_id, "t1");
        assert_eq!(visit.first_visit, datetime!(2020-01-01 00:00:00 UTC));
    }
}
