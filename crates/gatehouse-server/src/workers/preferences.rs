use async_trait::async_trait;
use serde_json::Value;
use tracing::error;

use super::{Worker, WorkerError};
use crate::cache::CacheBackend;
use crate::events::{ALERTS_UPDATED_TOPIC, Message, SETTINGS_UPDATED_TOPIC};
use crate::preferences::{Namespace, write_document};

/// Stores the published document as-is under `<namespace>:<userId>`.
pub struct UpdatePreferences {
    namespace: Namespace,
    cache: CacheBackend,
}

impl UpdatePreferences {
    pub fn new(namespace: Namespace, cache: CacheBackend) -> Self {
        Self { namespace, cache }
    }
}

#[async_trait]
impl Worker for UpdatePreferences {
    fn topic(&self) -> &'static str {
        match self.namespace {
            Namespace::Alerts => ALERTS_UPDATED_TOPIC,
            Namespace::Settings => SETTINGS_UPDATED_TOPIC,
        }
    }

    fn subscription(&self) -> &'static str {
        match self.namespace {
            Namespace::Alerts => "alerts-updated-redis",
            Namespace::Settings => "settings-updated-redis",
        }
    }

    async fn handle(&self, message: &Message) -> Result<(), WorkerError> {
        let document: Value = message.json()?;
        let user_id = match document.get("userId") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(WorkerError::MissingField("userId")),
        };

        if let Err(e) = write_document(&self.cache, self.namespace, &user_id, &document).await {
            error!(key = %self.namespace.key(&user_id), error = %e, "failed to set cache value");
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn replaying_an_update_is_idempotent() {
        let cache = CacheBackend::new_local();
        let worker = UpdatePreferences::new(Namespace::Settings, cache.clone());
        let message = Message::new(
            "1-0",
            json!({ "userId": "u1", "theme": "bright", "spaciness": "roomy" }).to_string(),
        );

        worker.handle(&message).await.unwrap();
        let once = cache.get("settings:u1").await.unwrap();
        worker.handle(&message).await.unwrap();
        let twice = cache.get("settings:u1").await.unwrap();

        assert!(once.is_some());
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn overwrites_without_merging() {
        let cache = CacheBackend::new_local();
        let worker = UpdatePreferences::new(Namespace::Alerts, cache.clone());
        worker
            .handle(&Message::new("1-0", r#"{"userId":"u1","filter":false,"rankLastSeen":1}"#))
            .await
            .unwrap();
        worker
            .handle(&Message::new("2-0", r#"{"userId":"u1","filter":true}"#))
            .await
            .unwrap();

        let cached: Value =
            serde_json::from_str(&cache.get("alerts:u1").await.unwrap().unwrap()).unwrap();
        assert_eq!(cached, json!({ "userId": "u1", "filter": true }));
    }

    #[tokio::test]
    async fn missing_user_id_is_an_error() {
        let worker = UpdatePreferences::new(Namespace::Alerts, CacheBackend::new_local());
        let result = worker.handle(&Message::new("1-0", r#"{"filter":true}"#)).await;
        assert!(matches!(result, Err(WorkerError::MissingField("userId"))));
    }

    #[tokio::test]
    async fn cache_write_failure_is_an_error() {
        let worker = UpdatePreferences::new(
            Namespace::Settings,
            crate::cache::testing::unreachable_redis(),
        );
        let result = worker
            .handle(&Message::new("1-0", r#"{"userId":"u1","theme":"bright"}"#))
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, WorkerError::Cache(_)));
        assert!(!err.is_permanent());
    }
}
