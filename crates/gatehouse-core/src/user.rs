use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The gateway's own copy of a user account.
///
/// The backend API is the system of record for profiles; the gateway keeps
/// just enough to resolve referrals and to clean up on account deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayUser {
    pub id: String,
    pub username: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl GatewayUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
            name: None,
            email: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Referral cookies may hold either the id or the username.
    pub fn matches(&self, id_or_username: &str) -> bool {
        self.id == id_or_username || self.username.as_deref() == Some(id_or_username)
    }
}
