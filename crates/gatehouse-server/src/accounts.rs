//! Account reads and deletion over the gateway's user table.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use gatehouse_api::ApiError;
use gatehouse_auth::TokenValidator;
use gatehouse_core::{AuthenticatedUser, GatewayUser, UserStorage};
use serde::Serialize;
use time::OffsetDateTime;

use crate::backend::BackendClient;

/// `GET /users/me/info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountInfo {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// `GET /users/{id}`: what anyone may see about an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: String,
    pub name: Option<String>,
    pub username: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<GatewayUser> for PublicProfile {
    fn from(user: GatewayUser) -> Self {
        Self {
            id: user.id,
            name: user.name,
            username: user.username,
            created_at: user.created_at,
        }
    }
}

fn internal(context: &str, error: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %error, "{context}");
    ApiError::internal(format!("{context}: {error}"))
}

pub struct AccountService {
    validator: Arc<TokenValidator>,
    users: Arc<dyn UserStorage>,
    backend: BackendClient,
}

impl AccountService {
    pub fn new(
        validator: Arc<TokenValidator>,
        users: Arc<dyn UserStorage>,
        backend: BackendClient,
    ) -> Self {
        Self {
            validator,
            users,
            backend,
        }
    }

    /// The authenticated caller. Anonymous callers are forbidden.
    async fn caller(
        &self,
        headers: &HeaderMap,
        jar: &CookieJar,
    ) -> Result<AuthenticatedUser, ApiError> {
        self.validator
            .validate(headers, jar)
            .await?
            .user
            .ok_or_else(ApiError::forbidden)
    }

    pub async fn info(
        &self,
        headers: &HeaderMap,
        jar: &CookieJar,
    ) -> Result<AccountInfo, ApiError> {
        let caller = self.caller(headers, jar).await?;
        let account = self
            .users
            .get_by_id_or_username(&caller.user_id)
            .await
            .map_err(|e| internal("failed to read account", e))?
            .ok_or_else(ApiError::forbidden)?;
        Ok(AccountInfo {
            name: account.name,
            email: account.email,
        })
    }

    pub async fn roles(
        &self,
        headers: &HeaderMap,
        jar: &CookieJar,
    ) -> Result<Vec<String>, ApiError> {
        let caller = self.caller(headers, jar).await?;
        self.users
            .roles(&caller.user_id)
            .await
            .map_err(|e| internal("failed to read roles", e))
    }

    pub async fn profile(&self, id_or_username: &str) -> Result<PublicProfile, ApiError> {
        self.users
            .get_by_id_or_username(id_or_username)
            .await
            .map_err(|e| internal("failed to read account", e))?
            .map(PublicProfile::from)
            .ok_or_else(|| ApiError::not_found(format!("user {id_or_username}")))
    }

    /// Deletes the caller's account here and in the backend, then logs out.
    pub async fn delete(
        &self,
        headers: &HeaderMap,
        jar: CookieJar,
        host: &str,
    ) -> Result<CookieJar, ApiError> {
        let caller = self.caller(headers, &jar).await?;
        self.users
            .delete_account(&caller.user_id)
            .await
            .map_err(|e| internal("failed to delete account", e))?;
        self.backend
            .delete_user(&caller.user_id)
            .await
            .map_err(|e| internal("failed to delete user in API", e))?;
        tracing::info!(user_id = %caller.user_id, "account deleted");

        Ok(self.validator.logout(headers, jar, host).await?)
    }

    /// Readiness of the user table.
    pub async fn ping(&self) -> bool {
        match self.users.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "storage ping failed");
                false
            }
        }
    }
}
