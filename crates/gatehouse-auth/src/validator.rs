//! Token Validator.
//!
//! Resolves the caller's identity from cookies using exactly one
//! [`AuthScheme`], chosen once per request.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use gatehouse_core::{AuthScheme, AuthenticatedUser, RefreshTokenStorage, TokenValidation};
use tracing::{debug, instrument, warn};

use crate::config::CookieConfig;
use crate::cookies::{self, cookie_value};
use crate::error::AuthError;
use crate::identity_provider::IdentityProviderClient;
use crate::jwt::JwtSigner;

pub struct TokenValidator {
    cookies: CookieConfig,
    refresh_tokens: Arc<dyn RefreshTokenStorage>,
    jwt: Arc<JwtSigner>,
    provider: IdentityProviderClient,
}

impl TokenValidator {
    pub fn new(
        cookies: CookieConfig,
        refresh_tokens: Arc<dyn RefreshTokenStorage>,
        jwt: Arc<JwtSigner>,
        provider: IdentityProviderClient,
    ) -> Self {
        Self {
            cookies,
            refresh_tokens,
            jwt,
            provider,
        }
    }

    pub fn cookie_config(&self) -> &CookieConfig {
        &self.cookies
    }

    pub fn jwt(&self) -> &JwtSigner {
        &self.jwt
    }

    pub fn scheme(&self, jar: &CookieJar) -> AuthScheme {
        let has_provider_session = cookie_value(jar, &self.cookies.provider_session).is_some();
        let has_legacy_token = cookie_value(jar, &self.cookies.refresh).is_some()
            || cookie_value(jar, &self.cookies.auth).is_some();
        AuthScheme::select(has_provider_session, has_legacy_token)
    }

    /// Resolves the identity of the caller.
    ///
    /// Fails with [`AuthError::Forbidden`] when a refresh-token cookie is
    /// present but unknown to the gateway.
    #[instrument(skip_all)]
    pub async fn validate(
        &self,
        headers: &HeaderMap,
        jar: &CookieJar,
    ) -> Result<TokenValidation, AuthError> {
        match self.scheme(jar) {
            AuthScheme::ExternalProvider => {
                let user = self.provider.whoami(headers).await?;
                Ok(match user {
                    Some(user_id) => {
                        TokenValidation::authenticated(AuthenticatedUser::external(user_id), false)
                    }
                    None => TokenValidation::anonymous(),
                })
            }
            AuthScheme::Legacy => self.validate_legacy(jar).await,
            AuthScheme::None => Ok(TokenValidation::anonymous()),
        }
    }

    async fn validate_legacy(&self, jar: &CookieJar) -> Result<TokenValidation, AuthError> {
        if let Some(refresh_token) = cookie_value(jar, &self.cookies.refresh) {
            return match self.refresh_tokens.find_user_id(&refresh_token).await? {
                Some(user_id) => Ok(TokenValidation::authenticated(
                    AuthenticatedUser::legacy(user_id),
                    true,
                )),
                None => {
                    debug!("Unknown refresh token presented");
                    Err(AuthError::Forbidden)
                }
            };
        }

        let Some(access_token) = cookie_value(jar, &self.cookies.auth) else {
            return Ok(TokenValidation::anonymous());
        };
        match self.jwt.verify(&access_token) {
            Ok(claims) => Ok(TokenValidation::authenticated(
                AuthenticatedUser::legacy(claims.user_id),
                false,
            )),
            Err(e) => {
                debug!(error = %e, "Ignoring invalid access token");
                Ok(TokenValidation::anonymous())
            }
        }
    }

    /// Adds removal cookies for the auth, refresh and referral cookies, plus
    /// the provider cookies when `provider_session` is set.
    pub fn clear_cookies(&self, jar: CookieJar, host: &str, provider_session: bool) -> CookieJar {
        let domain = cookies::effective_domain(host);
        let jar = cookies::clear(
            jar,
            &[
                self.cookies.auth.as_str(),
                self.cookies.refresh.as_str(),
                self.cookies.referral.as_str(),
            ],
            &domain,
        );
        if provider_session {
            cookies::clear(
                jar,
                &[
                    self.cookies.provider_session.as_str(),
                    self.cookies.provider_continuity.as_str(),
                ],
                &domain,
            )
        } else {
            jar
        }
    }

    /// Ends the session. Provider failures propagate.
    #[instrument(skip_all)]
    pub async fn logout(
        &self,
        headers: &HeaderMap,
        jar: CookieJar,
        host: &str,
    ) -> Result<CookieJar, AuthError> {
        let provider_session = self.scheme(&jar) == AuthScheme::ExternalProvider;
        if provider_session {
            self.provider.logout(headers).await?;
        }
        Ok(self.clear_cookies(jar, host, provider_session))
    }

    /// Ends the session of a caller the backend no longer recognizes.
    ///
    /// A provider failure is logged and the cookies are cleared regardless.
    pub async fn force_logout(&self, headers: &HeaderMap, jar: CookieJar, host: &str) -> CookieJar {
        let provider_session = self.scheme(&jar) == AuthScheme::ExternalProvider;
        if provider_session && let Err(e) = self.provider.logout(headers).await {
            warn!(error = %e, "Identity provider logout failed during forced logout");
        }
        self.clear_cookies(jar, host, provider_session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum::http::header::{COOKIE, SET_COOKIE};
    use axum::response::IntoResponse;
    use gatehouse_db_memory::InMemoryStorage;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::{IdentityProviderConfig, JwtConfig};

    fn jwt() -> Arc<JwtSigner> {
        Arc::new(JwtSigner::new(&JwtConfig {
            secret: "test-secret".into(),
            ..JwtConfig::default()
        }))
    }

    fn validator(storage: Arc<InMemoryStorage>, provider_origin: &str) -> TokenValidator {
        TokenValidator::new(
            CookieConfig::default(),
            storage,
            jwt(),
            IdentityProviderClient::new(&IdentityProviderConfig {
                origin: provider_origin.into(),
            })
            .unwrap(),
        )
    }

    fn jar(cookies: &[(&str, &str)]) -> CookieJar {
        let header = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(&header).unwrap());
        CookieJar::from_headers(&headers)
    }

    fn set_cookie_headers(jar: CookieJar) -> Vec<String> {
        let response = jar.into_response();
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(String::from))
            .collect()
    }

    #[tokio::test]
    async fn no_cookies_is_anonymous() {
        let validator = validator(Arc::new(InMemoryStorage::new()), "http://127.0.0.1:1");
        let result = validator
            .validate(&HeaderMap::new(), &CookieJar::new())
            .await
            .unwrap();
        assert_eq!(result, TokenValidation::anonymous());
    }

    #[tokio::test]
    async fn known_refresh_token_rotates() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.create("1", "refresh").await.unwrap();
        let validator = validator(storage, "http://127.0.0.1:1");

        let result = validator
            .validate(&HeaderMap::new(), &jar(&[("da5", "refresh")]))
            .await
            .unwrap();
        assert_eq!(result.user, Some(AuthenticatedUser::legacy("1")));
        assert!(result.should_rotate);
    }

    #[tokio::test]
    async fn unknown_refresh_token_is_forbidden() {
        let validator = validator(Arc::new(InMemoryStorage::new()), "http://127.0.0.1:1");
        let result = validator
            .validate(&HeaderMap::new(), &jar(&[("da5", "revoked")]))
            .await;
        assert!(matches!(result, Err(AuthError::Forbidden)));
    }

    #[tokio::test]
    async fn valid_access_token_authenticates_without_rotation() {
        let validator = validator(Arc::new(InMemoryStorage::new()), "http://127.0.0.1:1");
        let token = validator.jwt().sign("7", &[]).unwrap();

        let result = validator
            .validate(&HeaderMap::new(), &jar(&[("da3", token.token.as_str())]))
            .await
            .unwrap();
        assert_eq!(result.user, Some(AuthenticatedUser::legacy("7")));
        assert!(!result.should_rotate);
    }

    #[tokio::test]
    async fn invalid_access_token_is_anonymous() {
        let validator = validator(Arc::new(InMemoryStorage::new()), "http://127.0.0.1:1");
        let result = validator
            .validate(&HeaderMap::new(), &jar(&[("da3", "not-a-jwt")]))
            .await
            .unwrap();
        assert!(result.user.is_none());
    }

    #[tokio::test]
    async fn provider_session_takes_precedence_over_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sessions/whoami"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "identity": { "traits": { "userId": "k1" } }
            })))
            .mount(&server)
            .await;

        let validator = validator(Arc::new(InMemoryStorage::new()), &server.uri());
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("ory_kratos_session=s; da5=revoked"),
        );
        let jar = jar(&[("ory_kratos_session", "s"), ("da5", "revoked")]);

        let result = validator.validate(&headers, &jar).await.unwrap();
        assert_eq!(result.user, Some(AuthenticatedUser::external("k1")));
        assert!(!result.should_rotate);
    }

    #[tokio::test]
    async fn logout_clears_legacy_cookies_on_effective_domain() {
        let validator = validator(Arc::new(InMemoryStorage::new()), "http://127.0.0.1:1");
        let jar = validator
            .logout(&HeaderMap::new(), jar(&[("da5", "r")]), "app.daily.dev")
            .await
            .unwrap();

        let headers = set_cookie_headers(jar);
        for name in ["da3=", "da5=", "da4="] {
            assert!(
                headers
                    .iter()
                    .any(|h| h.starts_with(name) && h.contains("Domain=daily.dev")),
                "missing removal for {name}: {headers:?}"
            );
        }
        assert!(!headers.iter().any(|h| h.starts_with("ory_kratos_session=")));
    }

    #[tokio::test]
    async fn force_logout_swallows_provider_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/self-service/logout/browser"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let validator = validator(Arc::new(InMemoryStorage::new()), &server.uri());
        let jar = validator
            .force_logout(
                &HeaderMap::new(),
                jar(&[("ory_kratos_session", "s")]),
                "localhost",
            )
            .await;

        let headers = set_cookie_headers(jar);
        assert!(headers.iter().any(|h| h.starts_with("ory_kratos_session=")));
        assert!(headers.iter().any(|h| h.starts_with("ory_kratos_continuity=")));
    }
}
