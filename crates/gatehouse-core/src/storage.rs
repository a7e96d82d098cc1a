//! Storage traits for the gateway's own tables.
//!
//! Implementations live in separate crates:
//! - `gatehouse-db-postgres` - PostgreSQL backend
//! - `gatehouse-db-memory` - in-memory backend for tests and local runs

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::user::GatewayUser;
use crate::visit::{FirstVisit, VisitRecord};

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Resource already exists (conflict).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Refresh tokens are looked up by SHA-256 hash, never stored in clear.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Accounts, provider links and roles owned by the gateway.
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Finds a user whose id or username equals the argument.
    async fn get_by_id_or_username(&self, id_or_username: &str)
    -> StorageResult<Option<GatewayUser>>;

    /// Names of the linked external auth providers.
    async fn providers(&self, user_id: &str) -> StorageResult<Vec<String>>;

    /// Role names, sorted.
    async fn roles(&self, user_id: &str) -> StorageResult<Vec<String>>;

    /// Removes the account together with its provider links, roles and
    /// refresh tokens. Deleting an unknown user is not an error.
    async fn delete_account(&self, user_id: &str) -> StorageResult<()>;

    /// Checks that the backing store answers.
    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Refresh tokens issued by the legacy login flow.
#[async_trait]
pub trait RefreshTokenStorage: Send + Sync {
    /// Stores a token for a user.
    async fn create(&self, user_id: &str, token: &str) -> StorageResult<()>;

    /// Returns the owning user id, or `None` when the token was never issued
    /// or has been revoked.
    async fn find_user_id(&self, token: &str) -> StorageResult<Option<String>>;
}

/// Visit attribution records.
#[async_trait]
pub trait VisitStorage: Send + Sync {
    /// Earliest first visit for the tracking id across all apps.
    async fn first_visit_and_referral(&self, tracking_id: &str)
    -> StorageResult<Option<FirstVisit>>;

    async fn get(&self, tracking_id: &str, app: &str) -> StorageResult<Option<VisitRecord>>;

    /// Inserts the record, or on conflict updates only `visited_at` and `ip`.
    async fn upsert(&self, record: &VisitRecord) -> StorageResult<()>;
}
