//! Authentication configuration.
//!
//! These sections are embedded into the server's `AppConfig` and loaded with
//! the rest of the layered configuration.

use serde::{Deserialize, Serialize};

/// Names of the cookies the gateway reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Anonymous tracking id.
    pub tracking: String,
    /// Signed access token.
    pub auth: String,
    /// Referring user id or username.
    pub referral: String,
    /// Legacy refresh token.
    pub refresh: String,
    /// Per-browser session id.
    pub session: String,
    /// Identity-provider session; its presence selects the provider scheme.
    pub provider_session: String,
    pub provider_continuity: String,
    /// Mark cookies `Secure`.
    pub secure: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            tracking: "da2".into(),
            auth: "da3".into(),
            referral: "da4".into(),
            refresh: "da5".into(),
            session: "das".into(),
            provider_session: "ory_kratos_session".into(),
            provider_continuity: "ory_kratos_continuity".into(),
            secure: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// HMAC secret for access tokens. Must be set.
    pub secret: String,
    pub issuer: String,
    /// Access token lifetime. 15 minutes by default.
    pub access_token_ttl_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: "gatehouse".into(),
            access_token_ttl_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityProviderConfig {
    pub origin: String,
}

impl Default for IdentityProviderConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:4433".into(),
        }
    }
}
