//! Referral redirector.
//!
//! Shared links carry the referring user in `r`. The referral cookie set here
//! is what boot later resolves into `referrer` and stores on the visit.

use axum::extract::{Query, RawQuery, State};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::response::Redirect;
use axum_extra::extract::CookieJar;
use gatehouse_auth::cookies::{effective_domain, referral_cookie, request_host};
use serde::Deserialize;

use crate::boot::BootRequest;
use crate::config::RedirectsConfig;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ReferralQuery {
    pub r: Option<String>,
}

/// Appends the inbound query string, untouched, to `target`.
fn with_query(target: &str, query: Option<&str>) -> String {
    match query.filter(|q| !q.is_empty()) {
        Some(query) => format!("{target}?{query}"),
        None => target.to_string(),
    }
}

/// Extension store for the visitor's browser.
pub fn store_url<'a>(config: &'a RedirectsConfig, user_agent: &str) -> &'a str {
    if user_agent.contains("Firefox/") {
        &config.firefox_store_url
    } else if user_agent.contains("Edg/") {
        &config.edge_store_url
    } else {
        &config.chrome_store_url
    }
}

fn remember_referral(
    state: &AppState,
    headers: &HeaderMap,
    jar: CookieJar,
    referral: Option<&str>,
) -> CookieJar {
    let Some(referral) = referral.filter(|r| !r.is_empty()) else {
        return jar;
    };
    tracing::info!(referral = %referral, "redirecting by referral");
    let domain = effective_domain(&request_host(headers));
    jar.add(referral_cookie(&state.config.cookies, &domain, referral))
}

/// `GET /landing`
pub async fn landing(
    State(state): State<AppState>,
    Query(query): Query<ReferralQuery>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    let req = BootRequest::from_headers(headers.clone(), "");
    let jar = if req.is_bot {
        jar
    } else {
        remember_referral(&state, &headers, jar, query.r.as_deref())
    };
    let target = with_query(&state.config.redirects.landing_url, raw.as_deref());
    (jar, Redirect::temporary(&target))
}

/// `GET /get` and `GET /download`: the extension store for the browser.
pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<ReferralQuery>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    let req = BootRequest::from_headers(headers.clone(), "");
    let redirects = &state.config.redirects;
    if req.is_bot {
        return (jar, Redirect::temporary(&redirects.landing_url));
    }

    let jar = remember_referral(&state, &headers, jar, query.r.as_deref());
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let target = with_query(store_url(redirects, user_agent), raw.as_deref());
    (jar, Redirect::temporary(&target))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIREFOX: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0";
    const EDGE: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
        (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0";
    const CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
        (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

    #[test]
    fn store_is_picked_by_browser() {
        let config = RedirectsConfig::default();
        assert_eq!(store_url(&config, FIREFOX), config.firefox_store_url);
        assert_eq!(store_url(&config, EDGE), config.edge_store_url);
        assert_eq!(store_url(&config, CHROME), config.chrome_store_url);
        assert_eq!(store_url(&config, ""), config.chrome_store_url);
    }

    #[test]
    fn query_string_is_forwarded_verbatim() {
        assert_eq!(
            with_query("https://daily.dev", Some("r=ido&utm_source=x")),
            "https://daily.dev?r=ido&utm_source=x"
        );
        assert_eq!(with_query("https://daily.dev", Some("")), "https://daily.dev");
        assert_eq!(with_query("https://daily.dev", None), "https://daily.dev");
    }
}
