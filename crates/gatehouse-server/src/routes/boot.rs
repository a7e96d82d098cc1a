use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use gatehouse_api::ApiError;
use serde::Deserialize;

use crate::boot::{BootRequest, BootResponse, CompanionBootResponse};
use crate::flags::FlagMap;
use crate::server::AppState;

pub async fn boot(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<BootResponse>), ApiError> {
    let req = BootRequest::from_headers(headers, &state.config.api.secret);
    let (jar, body) = state.boot.boot(&req, jar).await?;
    Ok((jar, Json(body)))
}

#[derive(Debug, Deserialize)]
pub struct CompanionQuery {
    pub url: Option<String>,
}

pub async fn companion(
    State(state): State<AppState>,
    Query(query): Query<CompanionQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<CompanionBootResponse>), ApiError> {
    let url = match query.url.as_deref().map(str::trim) {
        None | Some("") => return Err(ApiError::validation("url", "url is required")),
        Some(url) => url,
    };
    if url::Url::parse(url).is_err() {
        return Err(ApiError::validation("url", "url is not valid"));
    }

    let req = BootRequest::from_headers(headers, &state.config.api.secret);
    let (jar, body) = state.boot.companion(&req, jar, url).await?;
    Ok((jar, Json(body)))
}

pub async fn features(State(state): State<AppState>, jar: CookieJar) -> Json<FlagMap> {
    Json(state.boot.features(&jar).await)
}
