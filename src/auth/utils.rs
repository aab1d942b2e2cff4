//! Small helpers for input validation, request headers and email links.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{AUTHORIZATION, COOKIE, InvalidHeaderValue},
};
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

pub const REFRESH_COOKIE_NAME: &str = "warden_refresh";
pub const ANONYMOUS_CLIENT: &str = "anonymous";

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 50;
const PASSWORD_MIN: usize = 6;
const PASSWORD_MAX: usize = 30;

static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    EMAIL_RE
        .as_ref()
        .is_some_and(|regex| regex.is_match(email_normalized))
}

/// # Errors
/// Returns a message describing the length constraint.
pub fn validate_username(username: &str) -> Result<(), String> {
    let len = username.trim().chars().count();
    if (USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        Ok(())
    } else {
        Err(format!(
            "username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"
        ))
    }
}

/// # Errors
/// Returns a message describing the length constraint.
pub fn validate_password(password: &str) -> Result<(), String> {
    let len = password.chars().count();
    if (PASSWORD_MIN..=PASSWORD_MAX).contains(&len) {
        Ok(())
    } else {
        Err(format!(
            "password must be between {PASSWORD_MIN} and {PASSWORD_MAX} characters"
        ))
    }
}

/// Client IP for rate limiting and deny lists.
///
/// The socket `peer` is authoritative unless `trust_proxy` is set. Behind a
/// trusted proxy the rightmost `X-Forwarded-For` hop (the address that proxy
/// appended) wins, then `X-Real-IP`; unparseable values fall back to `peer`.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy: bool) -> Option<IpAddr> {
    if !trust_proxy {
        return peer;
    }
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.rsplit(',').next())
        .and_then(|hop| hop.trim().parse().ok());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    };
    forwarded.or_else(real_ip).or(peer)
}

/// Rate-limit identity: the client IP, or a shared bucket when unknown.
#[must_use]
pub fn client_identity(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy: bool) -> String {
    client_ip(headers, peer, trust_proxy)
        .map_or_else(|| ANONYMOUS_CLIENT.to_string(), |ip| ip.to_string())
}

#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[must_use]
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| val.trim().to_string())
        })
        .find(|val| !val.is_empty())
}

/// `HttpOnly` cookie carrying the refresh token, scoped to the auth routes.
///
/// # Errors
/// Returns an error if the token contains characters invalid in a header.
pub fn refresh_cookie(
    token: &str,
    max_age: Duration,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}={token}; Path=/v1/auth; HttpOnly; SameSite=Lax; Max-Age={}",
        max_age.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// # Errors
/// Never in practice; the value is built from constants.
pub fn clear_refresh_cookie(secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{REFRESH_COOKIE_NAME}=; Path=/v1/auth; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Build a frontend link carrying `token` in the fragment, so it never reaches server logs.
#[must_use]
pub fn build_link(frontend_base_url: &str, path: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/{path}#token={token}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn username_and_password_lengths() {
        assert!(validate_username("ab").is_err());
        assert!(validate_username("abc").is_ok());
        assert!(validate_username(&"a".repeat(50)).is_ok());
        assert!(validate_username(&"a".repeat(51)).is_err());

        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
        assert!(validate_password(&"p".repeat(30)).is_ok());
        assert!(validate_password(&"p".repeat(31)).is_err());
    }

    fn proxied_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        headers
    }

    #[test]
    fn client_ip_ignores_forwarding_headers_from_untrusted_peers() {
        let peer: IpAddr = [203, 0, 113, 7].into();
        assert_eq!(client_ip(&proxied_headers(), Some(peer), false), Some(peer));
        assert_eq!(client_ip(&proxied_headers(), None, false), None);
    }

    #[test]
    fn client_ip_takes_rightmost_hop_behind_trusted_proxy() {
        let peer: IpAddr = [10, 0, 0, 1].into();
        assert_eq!(
            client_ip(&proxied_headers(), Some(peer), true),
            Some([5, 6, 7, 8].into())
        );
    }

    #[test]
    fn client_ip_falls_back_to_real_ip_then_peer() {
        let peer: IpAddr = [10, 0, 0, 1].into();
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(client_ip(&headers, Some(peer), true), Some([9, 9, 9, 9].into()));

        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        headers.insert("x-real-ip", HeaderValue::from_static("also garbage"));
        assert_eq!(client_ip(&headers, Some(peer), true), Some(peer));
    }

    #[test]
    fn client_identity_defaults_to_anonymous() {
        assert_eq!(client_identity(&HeaderMap::new(), None, true), ANONYMOUS_CLIENT);
        assert_eq!(
            client_identity(&proxied_headers(), Some([203, 0, 113, 7].into()), false),
            "203.0.113.7"
        );
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&headers), Some("abc.def.ghi".to_string()));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; warden_refresh=tok.en.sig; other=1"),
        );
        assert_eq!(
            extract_cookie(&headers, REFRESH_COOKIE_NAME),
            Some("tok.en.sig".to_string())
        );
        assert_eq!(extract_cookie(&headers, "missing"), None);
    }

    #[test]
    fn refresh_cookie_attributes() -> anyhow::Result<()> {
        let cookie = refresh_cookie("abc", Duration::from_secs(60), true)?;
        let value = cookie.to_str()?;
        assert!(value.starts_with("warden_refresh=abc;"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("Max-Age=60"));
        assert!(value.ends_with("; Secure"));

        let cleared = clear_refresh_cookie(false)?;
        assert!(cleared.to_str()?.contains("Max-Age=0"));
        Ok(())
    }

    #[test]
    fn build_link_trims_trailing_slash() {
        let url = build_link("https://warden.dev/", "verify-email", "token");
        assert_eq!(url, "https://warden.dev/verify-email#token=token");
    }
}
