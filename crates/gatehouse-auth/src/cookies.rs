//! Cookie helpers.
//!
//! Every cookie the gateway sets is scoped to the effective cookie domain so
//! that sibling subdomains (app, api, www) share it.

use std::net::IpAddr;

use axum::http::HeaderMap;
use axum::http::header::HOST;
use axum_extra::extract::CookieJar;
use cookie::{Cookie, SameSite};
use time::{Duration, OffsetDateTime};

use crate::config::CookieConfig;

/// Tracking cookie lifetime.
pub const TRACKING_MAX_AGE: Duration = Duration::days(365);

/// Session id lifetime, refreshed on every boot.
pub const SESSION_MAX_AGE: Duration = Duration::minutes(30);

/// Referral attribution lasts as long as the tracking id it attributes.
pub const REFERRAL_MAX_AGE: Duration = TRACKING_MAX_AGE;

/// Host the request was addressed to, without the port.
///
/// `x-forwarded-host` wins over `host` since the gateway runs behind a proxy.
pub fn request_host(headers: &HeaderMap) -> String {
    let raw = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(HOST))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("localhost");
    strip_port(raw).to_string()
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

/// Registrable domain used for cookie scoping.
///
/// Keeps the last two labels of the host. Localhost and IP addresses are
/// returned unchanged.
pub fn effective_domain(host: &str) -> String {
    let host = strip_port(host);
    if host == "localhost" || host.parse::<IpAddr>().is_ok() {
        return host.to_string();
    }
    let labels: Vec<&str> = host.split('.').collect();
    let start = labels.len().saturating_sub(2);
    labels[start..].join(".")
}

/// Non-empty cookie value.
pub fn cookie_value(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn build(
    name: &str,
    value: String,
    domain: &str,
    max_age: Duration,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name.to_string(), value))
        .domain(domain.to_string())
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build()
}

pub fn tracking_cookie(config: &CookieConfig, domain: &str, tracking_id: &str) -> Cookie<'static> {
    build(
        &config.tracking,
        tracking_id.to_string(),
        domain,
        TRACKING_MAX_AGE,
        config.secure,
    )
}

pub fn session_cookie(config: &CookieConfig, domain: &str, session_id: &str) -> Cookie<'static> {
    build(
        &config.session,
        session_id.to_string(),
        domain,
        SESSION_MAX_AGE,
        config.secure,
    )
}

pub fn referral_cookie(config: &CookieConfig, domain: &str, referral: &str) -> Cookie<'static> {
    build(
        &config.referral,
        referral.to_string(),
        domain,
        REFERRAL_MAX_AGE,
        config.secure,
    )
}

pub fn auth_cookie(
    config: &CookieConfig,
    domain: &str,
    token: &str,
    max_age: Duration,
) -> Cookie<'static> {
    build(
        &config.auth,
        token.to_string(),
        domain,
        max_age,
        config.secure,
    )
}

/// A cookie that tells the browser to drop `name` on `domain`.
pub fn removal_cookie(name: &str, domain: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), String::new()))
        .domain(domain.to_string())
        .path("/")
        .max_age(Duration::ZERO)
        .expires(OffsetDateTime::UNIX_EPOCH)
        .build()
}

/// Adds removal cookies for every name in `names`.
pub fn clear(jar: CookieJar, names: &[&str], domain: &str) -> CookieJar {
    names
        .iter()
        .fold(jar, |jar, name| jar.add(removal_cookie(name, domain)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn effective_domain_keeps_two_labels() {
        assert_eq!(effective_domain("app.daily.dev"), "daily.dev");
        assert_eq!(effective_domain("a.b.daily.dev"), "daily.dev");
        assert_eq!(effective_domain("daily.dev"), "daily.dev");
        assert_eq!(effective_domain("api.daily.dev:443"), "daily.dev");
    }

    #[test]
    fn effective_domain_localhost_and_ip() {
        assert_eq!(effective_domain("localhost"), "localhost");
        assert_eq!(effective_domain("localhost:5000"), "localhost");
        assert_eq!(effective_domain("127.0.0.1"), "127.0.0.1");
        assert_eq!(effective_domain("127.0.0.1:4000"), "127.0.0.1");
        assert_eq!(effective_domain("[::1]:5000"), "::1");
    }

    #[test]
    fn request_host_prefers_forwarded_host() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("internal:5000"));
        assert_eq!(request_host(&headers), "internal");

        headers.insert(
            "x-forwarded-host",
            HeaderValue::from_static("app.daily.dev, proxy"),
        );
        assert_eq!(request_host(&headers), "app.daily.dev");
        assert_eq!(request_host(&HeaderMap::new()), "localhost");
    }

    #[test]
    fn removal_cookie_expires_immediately() {
        let cookie = removal_cookie("da5", "daily.dev");
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(Duration::ZERO));
        assert_eq!(cookie.domain(), Some("daily.dev"));
    }

    #[test]
    fn referral_cookie_is_scoped_to_the_effective_domain() {
        let cookie = referral_cookie(&CookieConfig::default(), "daily.dev", "ido");
        assert_eq!(cookie.name(), "da4");
        assert_eq!(cookie.value(), "ido");
        assert_eq!(cookie.domain(), Some("daily.dev"));
        assert_eq!(cookie.max_age(), Some(REFERRAL_MAX_AGE));
    }

    #[test]
    fn empty_cookie_value_is_absent() {
        let jar = CookieJar::new()
            .add(Cookie::new("da2", ""))
            .add(Cookie::new("da4", "1"));
        assert!(cookie_value(&jar, "da2").is_none());
        assert_eq!(cookie_value(&jar, "da4").as_deref(), Some("1"));
        assert!(cookie_value(&jar, "da5").is_none());
    }
}
