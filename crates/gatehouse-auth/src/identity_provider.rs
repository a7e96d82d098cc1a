//! Client for the external identity provider.
//!
//! The provider owns sessions for users that signed in through it. The
//! gateway only asks "who is this" and, on logout, drives the provider's
//! browser logout flow on the caller's behalf.

use axum::http::HeaderMap;
use axum::http::header::{COOKIE, USER_AGENT};
use reqwest::{StatusCode, redirect};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::IdentityProviderConfig;

/// Request headers forwarded to the provider.
const FORWARDED_HEADERS: &[&str] = &[
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
];

#[derive(Debug, thiserror::Error)]
pub enum IdentityProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(StatusCode),
}

#[derive(Debug, Deserialize)]
struct LogoutFlow {
    logout_url: String,
}

#[derive(Debug, Clone)]
pub struct IdentityProviderClient {
    http: reqwest::Client,
    origin: String,
}

impl IdentityProviderClient {
    pub fn new(config: &IdentityProviderConfig) -> Result<Self, IdentityProviderError> {
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self {
            http,
            origin: config.origin.trim_end_matches('/').to_string(),
        })
    }

    fn forward(
        &self,
        builder: reqwest::RequestBuilder,
        headers: &HeaderMap,
    ) -> reqwest::RequestBuilder {
        let mut builder = builder;
        for name in [COOKIE.as_str(), USER_AGENT.as_str()]
            .into_iter()
            .chain(FORWARDED_HEADERS.iter().copied())
        {
            if let Some(value) = headers.get(name) {
                builder = builder.header(name, value.clone());
            }
        }
        builder
    }

    /// Resolves the caller's user id from the provider session.
    ///
    /// A 401 means the session is not authenticated and yields `None`, as does
    /// an identity without `traits.userId`.
    #[instrument(skip_all)]
    pub async fn whoami(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<String>, IdentityProviderError> {
        let url = format!("{}/sessions/whoami", self.origin);
        let response = self.forward(self.http.get(url), headers).send().await?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                debug!("Identity provider session not authenticated");
                Ok(None)
            }
            status if status.is_success() => {
                let body: serde_json::Value = response.json().await?;
                Ok(body
                    .pointer("/identity/traits/userId")
                    .and_then(|v| v.as_str())
                    .filter(|id| !id.is_empty())
                    .map(String::from))
            }
            status => Err(IdentityProviderError::Status(status)),
        }
    }

    /// Starts the browser logout flow and follows the single-use logout URL.
    ///
    /// The logout URL answers with a redirect on success.
    #[instrument(skip_all)]
    pub async fn logout(&self, headers: &HeaderMap) -> Result<(), IdentityProviderError> {
        let url = format!("{}/self-service/logout/browser", self.origin);
        let response = self.forward(self.http.get(url), headers).send().await?;
        if !response.status().is_success() {
            return Err(IdentityProviderError::Status(response.status()));
        }
        let flow: LogoutFlow = response.json().await?;

        let response = self
            .forward(self.http.get(&flow.logout_url), headers)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            Ok(())
        } else {
            Err(IdentityProviderError::Status(status))
        }
    }
}
