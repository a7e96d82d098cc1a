//! Core types for the Gatehouse gateway.
//!
//! This crate owns the vocabulary shared by every other crate:
//!
//! - [`identity`]: who a request belongs to (authenticated user or anonymous tracking id)
//! - [`visit`]: first-visit and referral attribution records
//! - [`user`]: the gateway's own slice of user data (accounts, providers, roles)
//! - [`storage`]: async storage traits implemented by the `gatehouse-db-*` crates

pub mod identity;
pub mod storage;
pub mod user;
pub mod visit;

pub use identity::{AuthScheme, AuthenticatedUser, Identity, IdentitySource, TokenValidation};
pub use storage::{
    RefreshTokenStorage, StorageError, StorageResult, UserStorage, VisitStorage, hash_token,
};
pub use user::GatewayUser;
pub use visit::{AppPlatform, FirstVisit, VisitRecord};
