//! In-memory storage backend for the Gatehouse gateway.
//!
//! Implements the storage traits from `gatehouse-core` on top of
//! [`DashMap`](dashmap::DashMap). Used by tests and by local runs with
//! `database.backend = "memory"`.
//!
//! # Example
//!
//! ```ignore
//! use gatehouse_core::{GatewayUser, UserStorage};
//! use gatehouse_db_memory::InMemoryStorage;
//!
//! let storage = InMemoryStorage::new();
//! storage.insert_user(GatewayUser::new("1").with_username("idoshamun"));
//! let user = storage.get_by_id_or_username("idoshamun").await?;
//! ```

mod storage;

pub use storage::InMemoryStorage;

/// Type alias for a shareable in-memory storage.
pub type DynInMemoryStorage = std::sync::Arc<InMemoryStorage>;

/// Creates a new shareable in-memory storage.
pub fn create_storage() -> DynInMemoryStorage {
    std::sync::Arc::new(InMemoryStorage::new())
}
