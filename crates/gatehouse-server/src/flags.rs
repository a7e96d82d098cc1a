//! Feature Flag Resolver.
//!
//! Flags come from the flag provider through a read-through cache under the
//! `features:` namespace. Any failure, including a lookup slower than the
//! configured timeout, resolves to the static default set.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::cache::{CacheBackend, CacheError};
use crate::config::FlagsConfig;

pub const FEATURES_PREFIX: &str = "features";

/// A flag narrowed to what clients see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Flag {
    pub fn new(enabled: bool, value: impl Into<Value>) -> Self {
        Self {
            enabled,
            value: Some(value.into()),
        }
    }
}

pub type FlagMap = BTreeMap<String, Flag>;

pub fn default_flags() -> FlagMap {
    FlagMap::from([
        ("feed_version".to_string(), Flag::new(true, 7)),
        ("my_feed_on".to_string(), Flag::new(true, "")),
    ])
}

pub fn features_key(identity: &str) -> String {
    format!("{FEATURES_PREFIX}:{identity}")
}

#[derive(Debug, thiserror::Error)]
pub enum FlagError {
    #[error("flag provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("flag provider responded with {0}")]
    Status(reqwest::StatusCode),

    #[error("flag cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("invalid flag document: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("flag lookup timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait FlagProvider: Send + Sync {
    async fn identity_flags(&self, identity: &str) -> Result<FlagMap, FlagError>;
}

#[derive(Debug, Deserialize)]
struct IdentityFlagsResponse {
    #[serde(default)]
    flags: Vec<ProviderFlag>,
}

#[derive(Debug, Deserialize)]
struct ProviderFlag {
    feature: ProviderFeature,
    enabled: bool,
    #[serde(default)]
    feature_state_value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ProviderFeature {
    name: String,
}

/// REST client for the Flagsmith identities endpoint.
pub struct FlagsmithClient {
    client: Client,
    api_url: String,
    environment_key: String,
}

impl FlagsmithClient {
    pub fn new(config: &FlagsConfig) -> Result<Self, FlagError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            environment_key: config.environment_key.clone(),
        })
    }
}

#[async_trait]
impl FlagProvider for FlagsmithClient {
    async fn identity_flags(&self, identity: &str) -> Result<FlagMap, FlagError> {
        let response = self
            .client
            .get(format!("{}/identities/", self.api_url))
            .query(&[("identifier", identity)])
            .header("X-Environment-Key", &self.environment_key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FlagError::Status(response.status()));
        }
        let body: IdentityFlagsResponse = response.json().await?;

        Ok(body
            .flags
            .into_iter()
            .map(|f| {
                let flag = Flag {
                    enabled: f.enabled,
                    value: f.feature_state_value.filter(|v| !v.is_null()),
                };
                (f.feature.name, flag)
            })
            .collect())
    }
}

/// Read-through cache in front of another provider.
///
/// The cached document is the narrowed flag map. A failed or unreadable
/// cache read falls through to the provider, whose answer replaces the entry.
pub struct CachedFlagProvider<P> {
    inner: P,
    cache: CacheBackend,
    ttl: Duration,
}

impl<P: FlagProvider> CachedFlagProvider<P> {
    pub fn new(inner: P, cache: CacheBackend, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }
}

#[async_trait]
impl<P: FlagProvider> FlagProvider for CachedFlagProvider<P> {
    async fn identity_flags(&self, identity: &str) -> Result<FlagMap, FlagError> {
        let key = features_key(identity);
        match self.cache.get(&key).await {
            Ok(Some(cached)) => match serde_json::from_str(&cached) {
                Ok(flags) => return Ok(flags),
                Err(e) => tracing::warn!(key = %key, error = %e, "discarding unreadable cached flags"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "flag cache read failed, using provider"),
        }

        let flags = self.inner.identity_flags(identity).await?;
        let document = serde_json::to_string(&flags)?;
        if let Err(e) = self.cache.set_with_expiry(&key, &document, self.ttl).await {
            tracing::warn!(key = %key, error = %e, "failed to cache feature flags");
        }
        Ok(flags)
    }
}

#[derive(Clone)]
pub struct FeatureFlagResolver {
    provider: Arc<dyn FlagProvider>,
    timeout: Duration,
}

impl FeatureFlagResolver {
    pub fn new(provider: Arc<dyn FlagProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Flags for the tracking identity. Never fails.
    pub async fn resolve(&self, identity: Option<&str>) -> FlagMap {
        let Some(identity) = identity else {
            return default_flags();
        };

        let result = match tokio::time::timeout(
            self.timeout,
            self.provider.identity_flags(identity),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FlagError::Timeout(self.timeout)),
        };

        match result {
            Ok(flags) => flags,
            Err(e) => {
                tracing::error!(identity = %identity, error = %e, "failed to fetch feature flags");
                default_flags()
            }
        }
    }
}

/// Unlocks `submit_article` for users whose reputation reached `threshold`.
pub fn submit_article_state(
    flags: &FlagMap,
    user: &Map<String, Value>,
    threshold: i64,
) -> Option<Flag> {
    let current = flags.get("submit_article");
    if current.is_some_and(|f| f.enabled) {
        return current.cloned();
    }
    let reputation = user.get("reputation").and_then(Value::as_i64);
    if reputation.is_some_and(|r| r >= threshold) {
        return Some(Flag::new(true, ""));
    }
    current.cloned()
}

/// The `companionExpanded` setting, falling back to the flag when the user
/// never chose. `stored` is the settings document before defaults apply.
pub fn companion_expanded_state(stored: &Map<String, Value>, flags: &FlagMap) -> Value {
    match stored.get("companionExpanded") {
        Some(value) if !value.is_null() => value.clone(),
        _ => json!(flags.get("companion_expanded").is_some_and(|f| f.enabled)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Slow;

    #[async_trait]
    impl FlagProvider for Slow {
        async fn identity_flags(&self, _identity: &str) -> Result<FlagMap, FlagError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(FlagMap::new())
        }
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl FlagProvider for Counting {
        async fn identity_flags(&self, _identity: &str) -> Result<FlagMap, FlagError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(FlagMap::from([("a".to_string(), Flag::new(true, 1))]))
        }
    }

    #[tokio::test]
    async fn no_identity_returns_defaults_without_lookup() {
        let resolver = FeatureFlagResolver::new(Arc::new(Slow), Duration::from_millis(10));
        assert_eq!(resolver.resolve(None).await, default_flags());
    }

    #[tokio::test]
    async fn slow_provider_degrades_to_defaults() {
        let resolver = FeatureFlagResolver::new(Arc::new(Slow), Duration::from_millis(50));
        let started = std::time::Instant::now();
        assert_eq!(resolver.resolve(Some("t1")).await, default_flags());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cached_provider_reads_through_once() {
        let cache = CacheBackend::new_local();
        let provider = CachedFlagProvider::new(
            Counting(AtomicUsize::new(0)),
            cache.clone(),
            Duration::from_secs(3600),
        );

        let first = provider.identity_flags("t1").await.unwrap();
        let second = provider.identity_flags("t1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.inner.0.load(Ordering::SeqCst), 1);
        assert!(cache.get("features:t1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unreadable_cached_flags_fall_through_to_provider() {
        let cache = CacheBackend::new_local();
        cache
            .set_with_expiry("features:t1", "not json", Duration::from_secs(3600))
            .await
            .unwrap();
        let provider = CachedFlagProvider::new(
            Counting(AtomicUsize::new(0)),
            cache.clone(),
            Duration::from_secs(3600),
        );

        let flags = provider.identity_flags("t1").await.unwrap();
        assert_eq!(flags["a"], Flag::new(true, 1));
        assert_eq!(provider.inner.0.load(Ordering::SeqCst), 1);

        // The provider's answer replaced the bad entry.
        let cached: FlagMap =
            serde_json::from_str(&cache.get("features:t1").await.unwrap().unwrap()).unwrap();
        assert_eq!(cached, flags);
    }

    #[tokio::test]
    async fn cache_outage_falls_through_to_provider() {
        let provider = CachedFlagProvider::new(
            Counting(AtomicUsize::new(0)),
            crate::cache::testing::unreachable_redis(),
            Duration::from_secs(3600),
        );

        let flags = provider.identity_flags("t1").await.unwrap();
        assert_eq!(flags["a"], Flag::new(true, 1));
        assert_eq!(provider.inner.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flagsmith_flags_are_narrowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/identities/"))
            .and(query_param("identifier", "t1"))
            .and(header("X-Environment-Key", "env"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "flags": [
                    { "id": 1, "feature": { "id": 9, "name": "feed_version", "type": "STANDARD" },
                      "enabled": true, "feature_state_value": 12 },
                    { "id": 2, "feature": { "id": 10, "name": "beta" },
                      "enabled": false, "feature_state_value": null }
                ],
                "traits": []
            })))
            .mount(&server)
            .await;

        let client = FlagsmithClient::new(&FlagsConfig {
            api_url: server.uri(),
            environment_key: "env".into(),
            ..FlagsConfig::default()
        })
        .unwrap();
        let flags = client.identity_flags("t1").await.unwrap();

        assert_eq!(flags["feed_version"], Flag::new(true, 12));
        assert_eq!(
            serde_json::to_value(&flags["beta"]).unwrap(),
            json!({ "enabled": false })
        );
    }

    #[test]
    fn submit_article_unlocked_by_reputation() {
        let flags = default_flags();
        let mut user = Map::new();
        user.insert("reputation".into(), json!(300));
        assert_eq!(
            submit_article_state(&flags, &user, 250),
            Some(Flag::new(true, ""))
        );

        user.insert("reputation".into(), json!(10));
        assert_eq!(submit_article_state(&flags, &user, 250), None);
    }

    #[test]
    fn submit_article_enabled_flag_is_kept() {
        let mut flags = default_flags();
        flags.insert("submit_article".into(), Flag::new(true, "x"));
        assert_eq!(
            submit_article_state(&flags, &Map::new(), 250),
            Some(Flag::new(true, "x"))
        );
    }

    #[test]
    fn companion_expanded_prefers_user_choice() {
        let mut flags = default_flags();
        flags.insert("companion_expanded".into(), Flag::new(true, ""));

        let mut settings = Map::new();
        assert_eq!(companion_expanded_state(&settings, &flags), json!(true));

        settings.insert("companionExpanded".into(), Value::Null);
        assert_eq!(companion_expanded_state(&settings, &flags), json!(true));

        settings.insert("companionExpanded".into(), json!(false));
        assert_eq!(companion_expanded_state(&settings, &flags), json!(false));
    }
}
