//! Mailing-list collaborator.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::MailingConfig;

#[derive(Debug, thiserror::Error)]
pub enum MailingError {
    #[error("mailing request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("mailing API responded with {0}")]
    Status(reqwest::StatusCode),
}

#[async_trait]
pub trait MailingList: Send + Sync {
    async fn contact_id_by_email(&self, email: &str) -> Result<Option<String>, MailingError>;

    async fn remove_contact(&self, contact_id: &str) -> Result<(), MailingError>;
}

#[derive(Debug, Deserialize)]
struct ContactSearch {
    #[serde(default)]
    result: Vec<Contact>,
}

#[derive(Debug, Deserialize)]
struct Contact {
    id: String,
}

pub struct HttpMailingList {
    client: Client,
    api_url: String,
    api_key: String,
}

impl HttpMailingList {
    pub fn new(config: &MailingConfig) -> Result<Self, MailingError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl MailingList for HttpMailingList {
    async fn contact_id_by_email(&self, email: &str) -> Result<Option<String>, MailingError> {
        let response = self
            .client
            .post(format!("{}/contacts/search", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&json!({ "emails": [email] }))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(MailingError::Status(response.status()));
        }
        let search: ContactSearch = response.json().await?;
        Ok(search.result.into_iter().next().map(|c| c.id))
    }

    async fn remove_contact(&self, contact_id: &str) -> Result<(), MailingError> {
        let response = self
            .client
            .delete(format!("{}/contacts", self.api_url))
            .bearer_auth(&self.api_key)
            .query(&[("ids", contact_id)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MailingError::Status(response.status()));
        }
        Ok(())
    }
}
