use async_trait::async_trait;
use dashmap::DashMap;

use gatehouse_core::{
    FirstVisit, GatewayUser, RefreshTokenStorage, StorageResult, UserStorage, VisitRecord,
    VisitStorage, hash_token,
};

/// Key of a visit row: `(tracking_id, app)`.
type VisitKey = (String, String);

/// DashMap-backed storage for users, refresh tokens and visits.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    users: DashMap<String, GatewayUser>,
    providers: DashMap<String, Vec<String>>,
    roles: DashMap<String, Vec<String>>,
    /// token hash -> user id
    refresh_tokens: DashMap<String, String>,
    visits: DashMap<VisitKey, VisitRecord>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: GatewayUser) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn add_provider(&self, user_id: &str, provider: impl Into<String>) {
        self.providers
            .entry(user_id.to_string())
            .or_default()
            .push(provider.into());
    }

    pub fn add_role(&self, user_id: &str, role: impl Into<String>) {
        let mut roles = self.roles.entry(user_id.to_string()).or_default();
        roles.push(role.into());
        roles.sort();
        roles.dedup();
    }

    /// Drops a refresh token, as a revocation would.
    pub fn revoke_refresh_token(&self, token: &str) {
        self.refresh_tokens.remove(&hash_token(token));
    }

    pub fn visit_count(&self) -> usize {
        self.visits.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[async_trait]
impl UserStorage for InMemoryStorage {
    async fn get_by_id_or_username(
        &self,
        id_or_username: &str,
    ) -> StorageResult<Option<GatewayUser>> {
        if let Some(user) = self.users.get(id_or_username) {
            return Ok(Some(user.clone()));
        }
        Ok(self
            .users
            .iter()
            .find(|entry| entry.value().matches(id_or_username))
            .map(|entry| entry.value().clone()))
    }

    async fn providers(&self, user_id: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .providers
            .get(user_id)
            .map(|p| p.clone())
            .unwrap_or_default())
    }

    async fn roles(&self, user_id: &str) -> StorageResult<Vec<String>> {
        Ok(self.roles.get(user_id).map(|r| r.clone()).unwrap_or_default())
    }

    async fn delete_account(&self, user_id: &str) -> StorageResult<()> {
        self.users.remove(user_id);
        self.providers.remove(user_id);
        self.roles.remove(user_id);
        self.refresh_tokens.retain(|_, owner| owner != user_id);
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStorage for InMemoryStorage {
    async fn create(&self, user_id: &str, token: &str) -> StorageResult<()> {
        self.refresh_tokens
            .insert(hash_token(token), user_id.to_string());
        Ok(())
    }

    async fn find_user_id(&self, token: &str) -> StorageResult<Option<String>> {
        Ok(self
            .refresh_tokens
            .get(&hash_token(token))
            .map(|owner| owner.clone()))
    }
}

#[async_trait]
impl VisitStorage for InMemoryStorage {
    async fn first_visit_and_referral(
        &self,
        tracking_id: &str,
    ) -> StorageResult<Option<FirstVisit>> {
        Ok(self
            .visits
            .iter()
            .filter(|entry| entry.key().0 == tracking_id)
            .min_by_key(|entry| entry.value().first_visit)
            .map(|entry| FirstVisit {
                first_visit: entry.value().first_visit,
                referral: entry.value().referral.clone(),
            }))
    }

    async fn get(&self, tracking_id: &str, app: &str) -> StorageResult<Option<VisitRecord>> {
        Ok(self
            .visits
            .get(&(tracking_id.to_string(), app.to_string()))
            .map(|v| v.clone()))
    }

    async fn upsert(&self, record: &VisitRecord) -> StorageResult<()> {
        self.visits
            .entry((record.tracking_id.clone(), record.app.clone()))
            .and_modify(|existing| existing.merge_later(record))
            .or_insert_with(|| record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn visit(app: &str, first_visit: time::OffsetDateTime, referral: Option<&str>) -> VisitRecord {
        VisitRecord {
            tracking_id: "t1".into(),
            app: app.into(),
            visited_at: first_visit,
            first_visit,
            referral: referral.map(String::from),
            ip: None,
        }
    }

    #[tokio::test]
    async fn resolves_user_by_id_or_username() {
        let storage = InMemoryStorage::new();
        storage.insert_user(GatewayUser::new("1").with_username("idoshamun"));

        let by_id = storage.get_by_id_or_username("1").await.unwrap();
        let by_username = storage.get_by_id_or_username("idoshamun").await.unwrap();
        let missing = storage.get_by_id_or_username("nobody").await.unwrap();

        assert_eq!(by_id.map(|u| u.id), Some("1".to_string()));
        assert_eq!(by_username.map(|u| u.id), Some("1".to_string()));
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn roles_are_sorted() {
        let storage = InMemoryStorage::new();
        storage.add_role("1", "moderator");
        storage.add_role("1", "admin");

        assert_eq!(storage.roles("1").await.unwrap(), vec!["admin", "moderator"]);
        assert!(storage.roles("2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn revoked_refresh_token_is_not_found() {
        let storage = InMemoryStorage::new();
        storage.create("1", "refresh").await.unwrap();
        assert_eq!(
            storage.find_user_id("refresh").await.unwrap().as_deref(),
            Some("1")
        );

        storage.revoke_refresh_token("refresh");
        assert!(storage.find_user_id("refresh").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_keeps_first_visit_and_referral() {
        let storage = InMemoryStorage::new();
        let first = visit("web", datetime!(2020-01-21 21:44:16 UTC), Some("1"));
        storage.upsert(&first).await.unwrap();

        let mut later = visit("web", datetime!(2021-03-01 10:00:00 UTC), Some("2"));
        later.ip = Some("10.0.0.9".into());
        storage.upsert(&later).await.unwrap();

        let stored = storage.get("t1", "web").await.unwrap().unwrap();
        assert_eq!(stored.first_visit, first.first_visit);
        assert_eq!(stored.referral.as_deref(), Some("1"));
        assert_eq!(stored.visited_at, later.visited_at);
        assert_eq!(stored.ip.as_deref(), Some("10.0.0.9"));
        assert_eq!(storage.visit_count(), 1);
    }

    #[tokio::test]
    async fn first_visit_is_earliest_across_apps() {
        let storage = InMemoryStorage::new();
        storage
            .upsert(&visit("web", datetime!(2021-01-01 00:00:00 UTC), None))
            .await
            .unwrap();
        storage
            .upsert(&visit("extension", datetime!(2020-06-01 00:00:00 UTC), Some("3")))
            .await
            .unwrap();

        let found = storage.first_visit_and_referral("t1").await.unwrap().unwrap();
        assert_eq!(found.first_visit, datetime!(2020-06-01 00:00:00 UTC));
        assert_eq!(found.referral.as_deref(), Some("3"));
        assert!(storage.first_visit_and_referral("t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_account_removes_related_rows() {
        let storage = InMemoryStorage::new();
        storage.insert_user(GatewayUser::new("1"));
        storage.add_provider("1", "github");
        storage.add_role("1", "admin");
        storage.create("1", "refresh").await.unwrap();
        storage.create("2", "other").await.unwrap();

        storage.delete_account("1").await.unwrap();

        assert!(storage.get_by_id_or_username("1").await.unwrap().is_none());
        assert!(storage.providers("1").await.unwrap().is_empty());
        assert!(storage.roles("1").await.unwrap().is_empty());
        assert!(storage.find_user_id("refresh").await.unwrap().is_none());
        assert!(storage.find_user_id("other").await.unwrap().is_some());
    }
}
