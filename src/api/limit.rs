//! Per-client request limits, applied to every route.
//!
//! Clients are keyed by the first `x-forwarded-for` hop, then `x-real-ip`,
//! then the socket peer. Reward routes count against a second, tighter limit.

use super::{error::ApiError, session::extract_client_ip};
use crate::{clock::Clock, limit::RequestLimiter, service::AuthConfig, AuthError};
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::debug;

const REWARDS_PREFIX: &str = "/v1/rewards";

#[derive(Clone)]
pub struct RequestLimits {
    general: Arc<RequestLimiter>,
    rewards: Arc<RequestLimiter>,
}

impl RequestLimits {
    #[must_use]
    pub fn new(config: &AuthConfig, clock: &Arc<dyn Clock>) -> Self {
        Self {
            general: Arc::new(RequestLimiter::new(config.request_limit(), Arc::clone(clock))),
            rewards: Arc::new(RequestLimiter::new(
                config.reward_request_limit(),
                Arc::clone(clock),
            )),
        }
    }
}

/// Refuse the request with 429 once its client used up a window.
///
/// # Errors
/// `TooManyAttempts` with the time left in the window.
pub async fn enforce(
    State(limits): State<RequestLimits>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client = client_key(&request);
    let mut checks = vec![&limits.general];
    if request.uri().path().starts_with(REWARDS_PREFIX) {
        checks.push(&limits.rewards);
    }
    for limiter in checks {
        if let Err(remaining) = limiter.check(&client) {
            debug!(client = %client, path = request.uri().path(), "request limit reached");
            return Err(AuthError::TooManyAttempts { remaining }.into());
        }
    }
    Ok(next.run(request).await)
}

fn client_key(request: &Request) -> String {
    extract_client_ip(request.headers())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn client_key_prefers_forwarded_header() {
        let mut request = Request::builder()
            .uri("/v1/me")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        assert_eq!(client_key(&request), "203.0.113.9");

        request.headers_mut().remove("x-forwarded-for");
        assert_eq!(client_key(&request), "127.0.0.1");

        request.extensions_mut().clear();
        assert_eq!(client_key(&request), "unknown");
    }
}
