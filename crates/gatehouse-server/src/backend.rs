//! Client for the backend API, the system of record for users and
//! preferences.
//!
//! Requests made on behalf of a user carry the service secret plus the
//! forwarded identity headers. Anonymous requests carry none of them.

use reqwest::{Client, StatusCode};
use serde_json::{Map, Value, json};

use crate::config::BackendApiConfig;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend responded with {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("graphql error: {message}")]
    GraphQl {
        message: String,
        /// `extensions.code` of the first error
        code: Option<String>,
    },
}

impl BackendError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            BackendError::Request(e) => e.status(),
            BackendError::GraphQl { .. } => None,
        }
    }

    /// The requested record does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            BackendError::GraphQl { code, .. } => code.as_deref() == Some("NOT_FOUND"),
            _ => self.status() == Some(StatusCode::NOT_FOUND),
        }
    }

    /// The backend no longer recognizes a user whose session is still valid.
    pub fn is_desynced_session(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::FORBIDDEN) | Some(StatusCode::NOT_FOUND)
        )
    }
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    secret: String,
}

impl BackendClient {
    pub fn new(config: &BackendApiConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &BackendApiConfig) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            secret: config.secret.clone(),
        }
    }

    fn request(
        &self,
        builder: reqwest::RequestBuilder,
        user_id: Option<&str>,
    ) -> reqwest::RequestBuilder {
        match user_id {
            Some(user_id) => builder
                .header("authorization", format!("Service {}", self.secret))
                .header("logged-in", "true")
                .header("user-id", user_id),
            None => builder,
        }
    }

    async fn get_json(&self, path: &str, user_id: Option<&str>) -> Result<Value, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.request(self.client.get(url), user_id).send().await?;
        Self::json_body(response).await
    }

    async fn json_body(response: reqwest::Response) -> Result<Value, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), body = %body, "backend call failed");
            return Err(BackendError::Status { status, body });
        }
        Ok(response.json().await?)
    }

    /// The user record as the backend sees it.
    pub async fn whoami(&self, user_id: &str) -> Result<Option<Map<String, Value>>, BackendError> {
        match self.get_json("/whoami", Some(user_id)).await? {
            Value::Object(user) => Ok(Some(user)),
            _ => Ok(None),
        }
    }

    pub async fn alerts(&self, user_id: &str) -> Result<Value, BackendError> {
        self.get_json("/alerts", Some(user_id)).await
    }

    pub async fn settings(&self, user_id: &str) -> Result<Value, BackendError> {
        self.get_json("/settings", Some(user_id)).await
    }

    /// Runs a GraphQL query and returns its `data` member, `null` when the
    /// response has neither data nor errors.
    pub async fn graphql(
        &self,
        user_id: Option<&str>,
        query: &str,
        variables: Value,
    ) -> Result<Value, BackendError> {
        let url = format!("{}/graphql", self.base_url);
        let response = self
            .request(self.client.post(url), user_id)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;
        let mut body = Self::json_body(response).await?;

        let data = body.get_mut("data").map(Value::take).unwrap_or(Value::Null);
        let Some(error) = body.pointer("/errors/0") else {
            return Ok(data);
        };
        if !data.is_null() {
            return Ok(data);
        }
        Err(BackendError::GraphQl {
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            code: error
                .pointer("/extensions/code")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    /// Removes the user's backend data.
    pub async fn delete_user(&self, user_id: &str) -> Result<(), BackendError> {
        self.graphql(Some(user_id), DELETE_USER_MUTATION, json!({}))
            .await
            .map(|_| ())
    }
}

const DELETE_USER_MUTATION: &str = r#"mutation DeleteUser {
  deleteUser {
    _
  }
}"#;
