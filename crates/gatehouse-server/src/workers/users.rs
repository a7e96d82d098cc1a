use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_core::UserStorage;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use super::{Worker, WorkerError};
use crate::events::{Message, USER_DELETED_TOPIC};
use crate::mailing::MailingList;

#[derive(Debug, Deserialize)]
struct DeletedUser {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    email: Option<String>,
}

impl DeletedUser {
    fn id(&self) -> Option<String> {
        match &self.id {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        }
    }
}

/// Removes the account and its provider links from the gateway tables.
pub struct DeleteUser {
    users: Arc<dyn UserStorage>,
}

impl DeleteUser {
    pub fn new(users: Arc<dyn UserStorage>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl Worker for DeleteUser {
    fn topic(&self) -> &'static str {
        USER_DELETED_TOPIC
    }

    fn subscription(&self) -> &'static str {
        "delete-user-gateway"
    }

    async fn handle(&self, message: &Message) -> Result<(), WorkerError> {
        let data: DeletedUser = message.json()?;
        let user_id = data.id().ok_or(WorkerError::MissingField("id"))?;

        info!(user_id = %user_id, "deleting gateway user");
        if let Err(e) = self.users.delete_account(&user_id).await {
            error!(user_id = %user_id, error = %e, "failed to delete user in gateway");
            return Err(e.into());
        }
        Ok(())
    }
}

/// Removes a deleted user's contact from the mailing list.
pub struct DeleteUserFromMailingList {
    mailing: Arc<dyn MailingList>,
}

impl DeleteUserFromMailingList {
    pub fn new(mailing: Arc<dyn MailingList>) -> Self {
        Self { mailing }
    }
}

#[async_trait]
impl Worker for DeleteUserFromMailingList {
    fn topic(&self) -> &'static str {
        USER_DELETED_TOPIC
    }

    fn subscription(&self) -> &'static str {
        "user-deleted-mailing"
    }

    async fn handle(&self, message: &Message) -> Result<(), WorkerError> {
        let data: DeletedUser = message.json()?;
        let user_id = data.id().unwrap_or_default();

        // A redelivery cannot produce the missing address.
        let Some(email) = data.email.as_deref().filter(|e| !e.is_empty()) else {
            warn!(user_id = %user_id, "no email in user-deleted message");
            return Ok(());
        };

        let result = async {
            match self.mailing.contact_id_by_email(email).await? {
                Some(contact_id) => self.mailing.remove_contact(&contact_id).await,
                None => {
                    info!(user_id = %user_id, "user has no mailing-list contact");
                    Ok(())
                }
            }
        }
        .await;

        if let Err(e) = result {
            error!(user_id = %user_id, error = %e, "failed to delete user from mailing list");
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::GatewayUser;
    use gatehouse_db_memory::InMemoryStorage;
    use parking_lot::Mutex;

    use crate::mailing::MailingError;

    #[derive(Default)]
    struct RecordingMailingList {
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MailingList for RecordingMailingList {
        async fn contact_id_by_email(&self, email: &str) -> Result<Option<String>, MailingError> {
            Ok((email == "known@daily.dev").then(|| "c1".to_string()))
        }

        async fn remove_contact(&self, contact_id: &str) -> Result<(), MailingError> {
            self.removed.lock().push(contact_id.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn delete_user_removes_account() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.insert_user(GatewayUser::new("1"));
        storage.add_provider("1", "github");

        DeleteUser::new(storage.clone())
            .handle(&Message::new("1-0", r#"{"id":"1"}"#))
            .await
            .unwrap();

        assert_eq!(storage.user_count(), 0);
        assert!(storage.providers("1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_user_without_id_fails() {
        let storage = Arc::new(InMemoryStorage::new());
        let result = DeleteUser::new(storage).handle(&Message::new("1-0", "{}")).await;
        assert!(matches!(result, Err(WorkerError::MissingField("id"))));
    }

    #[tokio::test]
    async fn mailing_missing_email_is_acknowledged() {
        let mailing = Arc::new(RecordingMailingList::default());
        DeleteUserFromMailingList::new(mailing.clone())
            .handle(&Message::new("1-0", r#"{"id":"1"}"#))
            .await
            .unwrap();
        assert!(mailing.removed.lock().is_empty());
    }

    #[tokio::test]
    async fn mailing_contact_is_removed() {
        let mailing = Arc::new(RecordingMailingList::default());
        let worker = DeleteUserFromMailingList::new(mailing.clone());

        worker
            .handle(&Message::new("1-0", r#"{"id":"1","email":"known@daily.dev"}"#))
            .await
            .unwrap();
        worker
            .handle(&Message::new("2-0", r#"{"id":"2","email":"other@daily.dev"}"#))
            .await
            .unwrap();

        assert_eq!(*mailing.removed.lock(), vec!["c1".to_string()]);
    }
}
