//! Authentication error types.

use gatehouse_api::ApiError;
use gatehouse_core::StorageError;

use crate::identity_provider::IdentityProviderError;
use crate::jwt::JwtError;

/// Errors raised while validating tokens or ending a session.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A refresh-token cookie was presented that the gateway does not know.
    #[error("Forbidden")]
    Forbidden,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Identity provider error: {0}")]
    IdentityProvider(#[from] IdentityProviderError),

    #[error("Token error: {0}")]
    Token(#[from] JwtError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Forbidden => ApiError::forbidden(),
            other => ApiError::internal(other.to_string()),
        }
    }
}
