//! Read-through cache for per-user alerts and settings.
//!
//! Cached documents are partial overrides. Every read merges them over the
//! namespace defaults, so a document missing a key still yields a complete
//! answer.

use std::time::Duration;

use gatehouse_core::AuthenticatedUser;
use serde_json::{Map, Value, json};

use crate::backend::{BackendClient, BackendError};
use crate::cache::{CacheBackend, CacheError};

/// Lifetime of alerts and settings entries.
pub const PREFERENCE_TTL: Duration = Duration::from_secs(2_628_288);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Alerts,
    Settings,
}

impl Namespace {
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Alerts => "alerts",
            Namespace::Settings => "settings",
        }
    }

    pub fn key(self, user_id: &str) -> String {
        format!("{}:{}", self.prefix(), user_id)
    }

    pub fn defaults(self) -> Map<String, Value> {
        let value = match self {
            Namespace::Alerts => json!({ "filter": true }),
            Namespace::Settings => json!({
                "theme": "darcula",
                "showTopSites": true,
                "insaneMode": false,
                "spaciness": "eco",
                "showOnlyUnreadPosts": false,
                "openNewTab": true,
                "sidebarExpanded": true,
                "companionExpanded": false,
            }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Fields stored with the document but never returned to clients.
    pub fn internal_fields(self) -> &'static [&'static str] {
        match self {
            Namespace::Alerts => &["userId"],
            Namespace::Settings => &["userId", "updatedAt", "bookmarkSlug"],
        }
    }
}

/// Shallow merge, `overrides` wins.
pub fn merge(defaults: Map<String, Value>, overrides: Map<String, Value>) -> Map<String, Value> {
    let mut merged = defaults;
    merged.extend(overrides);
    merged
}

fn strip_internal(namespace: Namespace, mut document: Map<String, Value>) -> Map<String, Value> {
    for field in namespace.internal_fields() {
        document.remove(*field);
    }
    document
}

/// Parses a cached document. `null` and non-objects count as a miss.
fn parse_cached(raw: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// A namespace document as stored, before defaults apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Preferences {
    pub namespace: Namespace,
    pub stored: Map<String, Value>,
}

impl Preferences {
    pub fn defaults(namespace: Namespace) -> Self {
        Self {
            namespace,
            stored: Map::new(),
        }
    }

    /// Whether the stored document sets `field` to a non-null value.
    pub fn is_set(&self, field: &str) -> bool {
        self.stored.get(field).is_some_and(|v| !v.is_null())
    }

    /// Stored keys merged over the defaults, internal fields removed.
    pub fn into_client_view(self) -> Map<String, Value> {
        strip_internal(
            self.namespace,
            merge(self.namespace.defaults(), self.stored),
        )
    }
}

#[derive(Clone)]
pub struct PreferenceStore {
    cache: CacheBackend,
    backend: BackendClient,
}

impl PreferenceStore {
    pub fn new(cache: CacheBackend, backend: BackendClient) -> Self {
        Self { cache, backend }
    }

    /// The client-facing document for `namespace`.
    pub async fn get(
        &self,
        namespace: Namespace,
        user: Option<&AuthenticatedUser>,
    ) -> Map<String, Value> {
        self.load(namespace, user).await.into_client_view()
    }

    /// The stored document for `namespace`, read through the cache.
    ///
    /// Cache and backend failures degrade to the defaults and are logged.
    pub async fn load(
        &self,
        namespace: Namespace,
        user: Option<&AuthenticatedUser>,
    ) -> Preferences {
        let Some(user) = user else {
            return Preferences::defaults(namespace);
        };
        let key = namespace.key(&user.user_id);

        let cached = match self.cache.get(&key).await {
            Ok(cached) => cached.as_deref().and_then(parse_cached),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed, using backend");
                None
            }
        };

        let stored = match cached {
            Some(document) => document,
            None => match self.fetch(namespace, &user.user_id, &key).await {
                Ok(document) => document,
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "unable to load preferences");
                    Map::new()
                }
            },
        };

        Preferences { namespace, stored }
    }

    async fn fetch(
        &self,
        namespace: Namespace,
        user_id: &str,
        key: &str,
    ) -> Result<Map<String, Value>, BackendError> {
        let value = match namespace {
            Namespace::Alerts => self.backend.alerts(user_id).await?,
            Namespace::Settings => self.backend.settings(user_id).await?,
        };
        let Value::Object(document) = value else {
            return Ok(Map::new());
        };

        let raw = Value::Object(document.clone()).to_string();
        if let Err(e) = self.cache.set_with_expiry(key, &raw, PREFERENCE_TTL).await {
            tracing::warn!(key = %key, error = %e, "failed to cache preferences");
        }
        Ok(document)
    }
}

/// Overwrites the cached document for `user_id`, no merge.
pub async fn write_document(
    cache: &CacheBackend,
    namespace: Namespace,
    user_id: &str,
    document: &Value,
) -> Result<(), CacheError> {
    cache
        .set_with_expiry(&namespace.key(user_id), &document.to_string(), PREFERENCE_TTL)
        .await
}
