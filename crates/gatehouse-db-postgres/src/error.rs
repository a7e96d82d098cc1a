//! Error types for the PostgreSQL storage backend.

use gatehouse_core::StorageError;

/// Errors raised while connecting to PostgreSQL or preparing the schema.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx_core::error::Error),

    /// Schema creation failed.
    #[error("Schema error: {0}")]
    Schema(String),
}

impl From<PostgresError> for StorageError {
    fn from(err: PostgresError) -> Self {
        StorageError::database(err.to_string())
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;

/// Maps a query error into the storage error used by the traits.
pub(crate) fn db_err(err: sqlx_core::error::Error) -> StorageError {
    StorageError::database(err.to_string())
}
