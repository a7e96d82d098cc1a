use axum::extract::{Query, State};
use axum::http::StatusCode;
use gatehouse_api::ApiError;
use serde::Deserialize;
use serde_json::json;

use crate::events::FEATURES_RESET_TOPIC;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ResetQuery {
    pub key: Option<String>,
}

/// Webhook called by the flag provider whenever flags change.
pub async fn reset(
    State(state): State<AppState>,
    Query(query): Query<ResetQuery>,
) -> Result<StatusCode, ApiError> {
    let secret = &state.config.flags.webhook_secret;
    let authorized = !secret.is_empty() && query.key.as_deref() == Some(secret.as_str());
    if !authorized {
        tracing::info!("wrong webhook key");
        return Ok(StatusCode::NO_CONTENT);
    }

    tracing::info!("sending features reset message");
    state
        .bus
        .publish(FEATURES_RESET_TOPIC, &json!({}))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to publish features reset");
            ApiError::internal(e.to_string())
        })?;
    Ok(StatusCode::NO_CONTENT)
}
