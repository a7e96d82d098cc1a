use async_trait::async_trait;
use tracing::info;

use super::{Worker, WorkerError};
use crate::cache::CacheBackend;
use crate::events::{FEATURES_RESET_TOPIC, Message};
use crate::flags::FEATURES_PREFIX;

/// Drops every cached flag document so the next lookup asks the provider.
pub struct ClearFeaturesCache {
    cache: CacheBackend,
}

impl ClearFeaturesCache {
    pub fn new(cache: CacheBackend) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Worker for ClearFeaturesCache {
    fn topic(&self) -> &'static str {
        FEATURES_RESET_TOPIC
    }

    fn subscription(&self) -> &'static str {
        "clear-features-cache"
    }

    async fn handle(&self, _message: &Message) -> Result<(), WorkerError> {
        let removed = self
            .cache
            .delete_by_pattern(&format!("{FEATURES_PREFIX}:*"))
            .await?;
        info!(removed, "features cache cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn clears_only_feature_keys() {
        let cache = CacheBackend::new_local();
        let ttl = Duration::from_secs(60);
        cache.set_with_expiry("features:1", "{}", ttl).await.unwrap();
        cache.set_with_expiry("features:2", "{}", ttl).await.unwrap();
        cache.set_with_expiry("settings:1", "{}", ttl).await.unwrap();

        ClearFeaturesCache::new(cache.clone())
            .handle(&Message::new("1-0", "{}"))
            .await
            .unwrap();

        assert_eq!(cache.count_by_pattern("features:*").await.unwrap(), 0);
        assert_eq!(cache.count_by_pattern("settings:*").await.unwrap(), 1);
    }
}
