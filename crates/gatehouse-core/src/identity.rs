//! Request identity.
//!
//! A request resolves to exactly one [`Identity`], once, before any data is
//! gathered. An authenticated user id and an anonymous tracking id are never
//! derived from one another.

use serde::{Deserialize, Serialize};

/// Which token scheme produced an authenticated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentitySource {
    /// Refresh-token or access-token cookie issued by this gateway.
    Legacy,
    /// Session owned by the external identity provider.
    ExternalProvider,
}

/// A caller whose user id was established by a token scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub source: IdentitySource,
}

impl AuthenticatedUser {
    pub fn legacy(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            source: IdentitySource::Legacy,
        }
    }

    pub fn external(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            source: IdentitySource::ExternalProvider,
        }
    }

    /// Roles and provider links still live in the gateway's tables, which the
    /// external provider does not own yet.
    pub fn owns_gateway_records(&self) -> bool {
        self.source == IdentitySource::Legacy
    }
}

/// Token scheme selected for a request, resolved once from cookie presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// Identity-provider session cookie present. Takes precedence.
    ExternalProvider,
    /// Refresh-token or access-token cookie present.
    Legacy,
    None,
}

impl AuthScheme {
    pub fn select(has_provider_session: bool, has_legacy_token: bool) -> Self {
        if has_provider_session {
            AuthScheme::ExternalProvider
        } else if has_legacy_token {
            AuthScheme::Legacy
        } else {
            AuthScheme::None
        }
    }
}

/// Outcome of token validation: at most one user plus a rotation flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenValidation {
    pub user: Option<AuthenticatedUser>,
    pub should_rotate: bool,
}

impl TokenValidation {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(user: AuthenticatedUser, should_rotate: bool) -> Self {
        Self {
            user: Some(user),
            should_rotate,
        }
    }
}

/// The single identity a request is served as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Authenticated(AuthenticatedUser),
    Anonymous { tracking_id: String },
}

impl Identity {
    /// Id used for visit attribution and feature flags.
    ///
    /// For authenticated callers this is the user id itself.
    pub fn tracking_id(&self) -> &str {
        match self {
            Identity::Authenticated(user) => &user.user_id,
            Identity::Anonymous { tracking_id } => tracking_id,
        }
    }

    pub fn user(&self) -> Option<&AuthenticatedUser> {
        match self {
            Identity::Authenticated(user) => Some(user),
            Identity::Anonymous { .. } => None,
        }
    }
}
