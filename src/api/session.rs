//! Session cookie and bearer token handling.

use super::error::ApiError;
use crate::{
    error::AuthError,
    model::{Principal, Role},
    rewards::ClaimContext,
    service::{AuthConfig, SessionGrant, Services},
};
use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE, USER_AGENT},
    HeaderMap, HeaderValue,
};

pub const SESSION_COOKIE_NAME: &str = "turnstile_session";

/// Resolve the caller from the session cookie or `Authorization: Bearer`.
///
/// # Errors
/// `InvalidToken` when no token is present or it does not check out.
pub async fn require_principal(
    headers: &HeaderMap,
    services: &Services,
) -> Result<Principal, ApiError> {
    let token = extract_session_token(headers).ok_or(AuthError::InvalidToken)?;
    Ok(services.auth.authenticate(&token).await?)
}

/// Build a secure `HttpOnly` cookie for the session token.
pub(crate) fn session_cookie(
    config: &AuthConfig,
    grant: &SessionGrant,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds(grant.principal.role);
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}",
        grant.token
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let value = headers.get(COOKIE)?.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let (key, val) = pair.trim().split_once('=')?;
        let val = val.trim();
        (key.trim() == SESSION_COOKIE_NAME && !val.is_empty()).then(|| val.to_string())
    })
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
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

/// First `x-forwarded-for` hop, then `x-real-ip`.
pub(crate) fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn claim_context(headers: &HeaderMap) -> ClaimContext {
    ClaimContext {
        ip_address: extract_client_ip(headers).and_then(|ip| ip.parse().ok()),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    }
}

/// Guard for role-scoped routes.
///
/// # Errors
/// `Forbidden` when the principal's role is not `role`.
pub(crate) fn require_role(principal: &Principal, role: Role) -> Result<(), ApiError> {
    if principal.role == role {
        Ok(())
    } else {
        Err(AuthError::Forbidden.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("turnstile_session=from-cookie"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; turnstile_session=abc.def; lang=en"),
        );
        assert_eq!(extract_session_token(&headers).as_deref(), Some("abc.def"));

        let mut empty = HeaderMap::new();
        empty.insert(COOKIE, HeaderValue::from_static("turnstile_session="));
        assert_eq!(extract_session_token(&empty), None);
    }

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 5.6.7.8"));
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));
        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn claim_context_drops_unparseable_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("not-an-ip"));
        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8"));
        let context = claim_context(&headers);
        assert!(context.ip_address.is_none());
        assert_eq!(context.user_agent.as_deref(), Some("curl/8"));
    }
}
