//! Boot Aggregator.
//!
//! Builds the per-request view of a caller from the token validator, the
//! backend API, the gateway's own tables, the preference cache and the flag
//! resolver. Identity is resolved once, up front, and every later step reads
//! it from [`Identity`].

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum_extra::extract::CookieJar;
use gatehouse_api::ApiError;
use gatehouse_auth::cookies::{
    auth_cookie, cookie_value, effective_domain, request_host, session_cookie, tracking_cookie,
};
use gatehouse_auth::{AccessToken, TokenValidator};
use gatehouse_core::{
    AppPlatform, AuthenticatedUser, FirstVisit, Identity, TokenValidation, UserStorage,
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::backend::BackendClient;
use crate::flags::{
    FeatureFlagResolver, FlagMap, companion_expanded_state, submit_article_state,
};
use crate::preferences::{Namespace, PreferenceStore};
use crate::visits::VisitTracker;

/// User agents treated as crawlers: no session cookie is issued to them.
const BOT_MARKERS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "slurp",
    "crawling",
    "facebookexternalhit",
    "headlesschrome",
];

pub const COMPANION_POST_QUERY: &str = r#"query Post($url: String) {
  postByUrl(url: $url) {
    id
    title
    image
    permalink
    commentsPermalink
    trending
    summary
    numUpvotes
    upvoted
    numComments
    bookmarked
    createdAt
    readTime
    tags
    source {
      id
      name
      image
    }
    author {
      id
    }
  }
}"#;

/// What the aggregator needs to know about the inbound request.
#[derive(Debug, Clone)]
pub struct BootRequest {
    pub headers: HeaderMap,
    pub host: String,
    pub ip: Option<String>,
    pub app: AppPlatform,
    pub is_bot: bool,
    /// Service-to-service call, authenticated with the shared secret
    pub is_service: bool,
}

impl BootRequest {
    pub fn from_headers(headers: HeaderMap, service_secret: &str) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let ip = header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .or_else(|| header("x-real-ip"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let app = AppPlatform::from_header(header("app"));
        let is_bot = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| {
                let ua = ua.to_ascii_lowercase();
                BOT_MARKERS.iter().any(|marker| ua.contains(marker))
            })
            .unwrap_or(false);
        let is_service = !service_secret.is_empty()
            && headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == format!("Service {service_secret}"));

        Self {
            host: request_host(&headers),
            headers,
            ip,
            app,
            is_bot,
            is_service,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitInfo {
    pub visit_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// The part of the response shared by every boot variant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseBoot {
    pub visit: VisitInfo,
    pub user: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_link: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub should_logout: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BootResponse {
    #[serde(flatten)]
    pub base: BaseBoot,
    pub flags: FlagMap,
    pub alerts: Map<String, Value>,
    pub settings: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionBootResponse {
    #[serde(flatten)]
    pub base: BaseBoot,
    pub post_data: Value,
    pub flags: FlagMap,
    pub alerts: Map<String, Value>,
    pub settings: Map<String, Value>,
}

/// `GET /users/me`: the user fields and visit ids side by side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: Map<String, Value>,
    #[serde(flatten)]
    pub visit: VisitInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_link: Option<String>,
}

impl From<BaseBoot> for MeResponse {
    fn from(base: BaseBoot) -> Self {
        Self {
            user: base.user,
            visit: base.visit,
            access_token: base.access_token,
            registration_link: base.registration_link,
        }
    }
}

fn timestamp(t: OffsetDateTime) -> Value {
    t.format(&Rfc3339).map(Value::String).unwrap_or(Value::Null)
}

/// Attribution for a caller without a backend account.
///
/// A resolvable referrer wins over a prior visit.
pub fn anonymous_attribution(
    visit: Option<&FirstVisit>,
    referrer: Option<String>,
    now: OffsetDateTime,
) -> Map<String, Value> {
    let mut user = Map::new();
    match (referrer, visit) {
        (Some(referrer), _) => {
            user.insert("isFirstVisit".into(), json!(true));
            user.insert("firstVisit".into(), timestamp(now));
            user.insert("referrer".into(), json!(referrer));
        }
        (None, Some(visit)) => {
            user.insert("firstVisit".into(), timestamp(visit.first_visit));
            user.insert("referrer".into(), json!(visit.referral));
        }
        (None, None) => {
            user.insert("isFirstVisit".into(), json!(true));
            user.insert("firstVisit".into(), timestamp(now));
        }
    }
    user
}

/// Attribution for an account holder. The earlier of the recorded first
/// visit and the account creation time is reported.
pub fn authenticated_attribution(
    visit: Option<&FirstVisit>,
    created_at: Option<OffsetDateTime>,
    referrer: Option<String>,
    now: OffsetDateTime,
) -> Map<String, Value> {
    let Some(visit) = visit else {
        return anonymous_attribution(None, referrer, now);
    };
    let first_visit = match created_at {
        Some(created_at) => visit.first_visit.min(created_at),
        None => visit.first_visit,
    };
    let mut user = Map::new();
    user.insert("firstVisit".into(), timestamp(first_visit));
    user.insert("referrer".into(), json!(visit.referral));
    user
}

fn internal(context: &str, error: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %error, "{context}");
    ApiError::internal(format!("{context}: {error}"))
}

pub struct BootAggregator {
    validator: Arc<TokenValidator>,
    backend: BackendClient,
    users: Arc<dyn UserStorage>,
    visits: VisitTracker,
    preferences: PreferenceStore,
    flags: FeatureFlagResolver,
    webapp_origin: String,
    submit_article_threshold: i64,
}

impl BootAggregator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        validator: Arc<TokenValidator>,
        backend: BackendClient,
        users: Arc<dyn UserStorage>,
        visits: VisitTracker,
        preferences: PreferenceStore,
        flags: FeatureFlagResolver,
        webapp_origin: impl Into<String>,
        submit_article_threshold: i64,
    ) -> Self {
        Self {
            validator,
            backend,
            users,
            visits,
            preferences,
            flags,
            webapp_origin: webapp_origin.into().trim_end_matches('/').to_string(),
            submit_article_threshold,
        }
    }

    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// `GET /boot`
    pub async fn boot(
        &self,
        req: &BootRequest,
        jar: CookieJar,
    ) -> Result<(CookieJar, BootResponse), ApiError> {
        let validation = self.validator.validate(&req.headers, &jar).await?;
        let (identity, jar) = self.resolve_identity(req, jar, &validation);
        let user = validation.user.as_ref();

        let (mut flags, base, alerts, stored_settings) = tokio::join!(
            self.flags.resolve(Some(identity.tracking_id())),
            self.shared(req, jar, &validation, &identity),
            self.preferences.get(Namespace::Alerts, user),
            self.preferences.load(Namespace::Settings, user),
        );
        let (jar, base) = base?;

        match submit_article_state(&flags, &base.user, self.submit_article_threshold) {
            Some(flag) => {
                flags.insert("submit_article".into(), flag);
            }
            None => {
                flags.remove("submit_article");
            }
        }
        let expanded = companion_expanded_state(&stored_settings.stored, &flags);
        let mut settings = stored_settings.into_client_view();
        settings.insert("companionExpanded".into(), expanded);

        Ok((
            jar,
            BootResponse {
                base,
                flags,
                alerts,
                settings,
            },
        ))
    }

    /// `GET /boot/companion`. Fails with not-found when the post is unknown.
    pub async fn companion(
        &self,
        req: &BootRequest,
        jar: CookieJar,
        url: &str,
    ) -> Result<(CookieJar, CompanionBootResponse), ApiError> {
        let validation = self.validator.validate(&req.headers, &jar).await?;
        let (identity, jar) = self.resolve_identity(req, jar, &validation);
        let user = validation.user.as_ref();

        let (post, base, flags, settings, alerts) = tokio::join!(
            self.backend.graphql(
                user.map(|u| u.user_id.as_str()),
                COMPANION_POST_QUERY,
                json!({ "url": url }),
            ),
            self.shared(req, jar, &validation, &identity),
            self.flags.resolve(Some(identity.tracking_id())),
            self.preferences.get(Namespace::Settings, user),
            self.preferences.get(Namespace::Alerts, user),
        );

        let post = match post {
            Ok(post) => post,
            Err(e) if e.is_not_found() => return Err(ApiError::not_found(format!("post {url}"))),
            Err(e) => return Err(internal("companion post lookup failed", e)),
        };
        let post_data = match post.get("postByUrl") {
            Some(post) if !post.is_null() => post.clone(),
            _ => return Err(ApiError::not_found(format!("post {url}"))),
        };
        let (jar, base) = base?;

        Ok((
            jar,
            CompanionBootResponse {
                base,
                post_data,
                flags,
                alerts,
                settings,
            },
        ))
    }

    /// `GET /users/me`
    pub async fn me(
        &self,
        req: &BootRequest,
        jar: CookieJar,
    ) -> Result<(CookieJar, MeResponse), ApiError> {
        let validation = self.validator.validate(&req.headers, &jar).await?;
        let (identity, jar) = self.resolve_identity(req, jar, &validation);
        let (jar, base) = self.shared(req, jar, &validation, &identity).await?;
        Ok((jar, base.into()))
    }

    /// `GET /boot/features`
    ///
    /// Identity comes from a valid access token, else the tracking cookie.
    /// No identity is generated here.
    pub async fn features(&self, jar: &CookieJar) -> FlagMap {
        let cookies = self.validator.cookie_config();
        let identity = cookie_value(jar, &cookies.auth)
            .and_then(|token| self.validator.jwt().verify(&token).ok())
            .map(|claims| claims.user_id)
            .or_else(|| cookie_value(jar, &cookies.tracking));
        self.flags.resolve(identity.as_deref()).await
    }

    /// Tracking id: the user id when authenticated, else the tracking
    /// cookie, else a fresh id written back as the tracking cookie.
    fn resolve_identity(
        &self,
        req: &BootRequest,
        jar: CookieJar,
        validation: &TokenValidation,
    ) -> (Identity, CookieJar) {
        if let Some(user) = &validation.user {
            return (Identity::Authenticated(user.clone()), jar);
        }
        let cookies = self.validator.cookie_config();
        if let Some(tracking_id) = cookie_value(&jar, &cookies.tracking) {
            return (Identity::Anonymous { tracking_id }, jar);
        }
        let tracking_id = Uuid::new_v4().to_string();
        let domain = effective_domain(&req.host);
        let jar = jar.add(tracking_cookie(cookies, &domain, &tracking_id));
        (Identity::Anonymous { tracking_id }, jar)
    }

    /// Reuses the caller's session id or starts one, and refreshes its
    /// cookie. Bots and service calls get no session cookie.
    fn ensure_session(&self, req: &BootRequest, jar: CookieJar) -> (CookieJar, Option<String>) {
        let cookies = self.validator.cookie_config();
        let existing = cookie_value(&jar, &cookies.session);
        if req.is_bot || req.is_service {
            return (jar, existing);
        }
        let session_id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());
        let domain = effective_domain(&req.host);
        let jar = jar.add(session_cookie(cookies, &domain, &session_id));
        (jar, Some(session_id))
    }

    async fn resolve_referral(&self, referral: Option<&str>) -> Option<String> {
        match referral {
            Some(referral) => self.visits.resolve_referral(referral).await,
            None => None,
        }
    }

    /// The boot logic shared by every variant.
    async fn shared(
        &self,
        req: &BootRequest,
        jar: CookieJar,
        validation: &TokenValidation,
        identity: &Identity,
    ) -> Result<(CookieJar, BaseBoot), ApiError> {
        let tracking_id = identity.tracking_id().to_string();
        let (jar, session_id) = self.ensure_session(req, jar);
        let visit = VisitInfo {
            visit_id: Uuid::new_v4().to_string(),
            session_id,
        };
        let now = OffsetDateTime::now_utc();
        let referral = cookie_value(&jar, &self.validator.cookie_config().referral);

        let (jar, base) = match identity {
            Identity::Authenticated(user) => {
                self.authenticated(
                    req,
                    jar,
                    user,
                    validation.should_rotate,
                    visit,
                    referral.as_deref(),
                    now,
                )
                .await?
            }
            Identity::Anonymous { tracking_id } => {
                let (prior, referrer) = tokio::join!(
                    self.visits.first_visit(tracking_id),
                    self.resolve_referral(referral.as_deref()),
                );
                let base = anonymous_base(visit, &prior, referrer, tracking_id, now, false);
                (jar, base)
            }
        };

        self.visits
            .record_detached(tracking_id, &req.app, now, referral, req.ip.clone());

        Ok((jar, base))
    }

    #[allow(clippy::too_many_arguments)]
    async fn authenticated(
        &self,
        req: &BootRequest,
        jar: CookieJar,
        user: &AuthenticatedUser,
        should_rotate: bool,
        visit: VisitInfo,
        referral: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<(CookieJar, BaseBoot), ApiError> {
        let owns_records = user.owns_gateway_records();
        let (prior, backend_user, providers, roles) = tokio::join!(
            self.visits.first_visit(&user.user_id),
            self.backend.whoami(&user.user_id),
            async {
                if owns_records {
                    self.users.providers(&user.user_id).await
                } else {
                    Ok(Vec::new())
                }
            },
            async {
                if owns_records {
                    self.users.roles(&user.user_id).await
                } else {
                    Ok(Vec::new())
                }
            },
        );

        let backend_user = match backend_user {
            Ok(Some(backend_user)) => backend_user,
            Ok(None) => {
                tracing::warn!(user_id = %user.user_id, "backend returned no user");
                let fallback = self
                    .desynced(req, jar, visit, &prior, referral, &user.user_id, now)
                    .await;
                return Ok(fallback);
            }
            Err(e) if e.is_desynced_session() => {
                tracing::error!(user_id = %user.user_id, error = %e, "failed to fetch user from API");
                let fallback = self
                    .desynced(req, jar, visit, &prior, referral, &user.user_id, now)
                    .await;
                return Ok(fallback);
            }
            Err(e) => return Err(internal("failed to fetch user from API", e)),
        };
        let providers = providers.map_err(|e| internal("failed to read providers", e))?;
        let roles = roles.map_err(|e| internal("failed to read roles", e))?;

        let (jar, access_token) = if should_rotate {
            let token = self
                .validator
                .jwt()
                .sign(&user.user_id, &roles)
                .map_err(|e| internal("failed to sign access token", e))?;
            let domain = effective_domain(&req.host);
            let cookie = auth_cookie(
                self.validator.cookie_config(),
                &domain,
                &token.token,
                self.validator.jwt().ttl(),
            );
            (jar.add(cookie), Some(token))
        } else {
            (jar, None)
        };

        let created_at = backend_user
            .get("createdAt")
            .and_then(Value::as_str)
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok());
        let referrer = if prior.is_none() {
            self.resolve_referral(referral).await
        } else {
            None
        };
        let mut fields = authenticated_attribution(prior.as_ref(), created_at, referrer, now);

        let slug = backend_user
            .get("username")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .or_else(|| backend_user.get("id").and_then(Value::as_str).map(String::from))
            .unwrap_or_else(|| user.user_id.clone());
        let info_confirmed = backend_user
            .get("infoConfirmed")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        fields.extend(backend_user);
        fields.insert("providers".into(), json!(providers));
        fields.insert("roles".into(), json!(roles));
        fields.insert(
            "permalink".into(),
            json!(format!("{}/{}", self.webapp_origin, slug)),
        );

        let registration_link =
            (!info_confirmed).then(|| format!("{}/register", self.webapp_origin));

        Ok((
            jar,
            BaseBoot {
                visit,
                user: fields,
                access_token,
                registration_link,
                should_logout: false,
            },
        ))
    }

    /// The backend no longer knows the user: answer as anonymous and end
    /// the session.
    #[allow(clippy::too_many_arguments)]
    async fn desynced(
        &self,
        req: &BootRequest,
        jar: CookieJar,
        visit: VisitInfo,
        prior: &Option<FirstVisit>,
        referral: Option<&str>,
        tracking_id: &str,
        now: OffsetDateTime,
    ) -> (CookieJar, BaseBoot) {
        let referrer = self.resolve_referral(referral).await;
        let base = anonymous_base(visit, prior, referrer, tracking_id, now, true);
        let jar = self
            .validator
            .force_logout(&req.headers, jar, &req.host)
            .await;
        (jar, base)
    }
}

fn anonymous_base(
    visit: VisitInfo,
    prior: &Option<FirstVisit>,
    referrer: Option<String>,
    tracking_id: &str,
    now: OffsetDateTime,
    should_logout: bool,
) -> BaseBoot {
    let mut user = anonymous_attribution(prior.as_ref(), referrer, now);
    user.insert("id".into(), json!(tracking_id));
    BaseBoot {
        visit,
        user,
        access_token: None,
        registration_link: None,
        should_logout,
    }
}
