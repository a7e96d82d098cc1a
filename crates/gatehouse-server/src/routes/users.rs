use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum_extra::extract::CookieJar;
use gatehouse_api::ApiError;
use gatehouse_auth::cookies::request_host;

use crate::accounts::{AccountInfo, PublicProfile};
use crate::boot::{BootRequest, MeResponse};
use crate::server::AppState;

pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MeResponse>), ApiError> {
    let req = BootRequest::from_headers(headers, &state.config.api.secret);
    let (jar, body) = state.boot.me(&req, jar).await?;
    Ok((jar, Json(body)))
}

pub async fn info(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<AccountInfo>, ApiError> {
    Ok(Json(state.accounts.info(&headers, &jar).await?))
}

pub async fn roles(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.accounts.roles(&headers, &jar).await?))
}

pub async fn profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PublicProfile>, ApiError> {
    Ok(Json(state.accounts.profile(&id).await?))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), ApiError> {
    let host = request_host(&headers);
    let jar = state.boot.validator().logout(&headers, jar, &host).await?;
    Ok((jar, StatusCode::NO_CONTENT))
}

/// `DELETE /users/me`
pub async fn delete_me(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), ApiError> {
    let host = request_host(&headers);
    let jar = state.accounts.delete(&headers, jar, &host).await?;
    Ok((jar, StatusCode::NO_CONTENT))
}
