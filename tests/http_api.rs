//! HTTP surface tests: the real router and middleware stack over in-memory
//! services, driven with `tower::ServiceExt::oneshot`.

mod common;

use anyhow::{Context, Result};
use axum::{
    body::{to_bytes, Body},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, SET_COOKIE},
        Method, Request, StatusCode,
    },
    Router,
};
use chrono::Duration;
use common::{TestContext, ADMIN_PASSWORD, FRONTEND, PASSWORD};
use serde_json::{json, Value};
use tower::ServiceExt;
use turnstile::{
    api::{self, StorageCheck},
    limit::WindowLimit,
    service::AuthConfig,
};

struct Reply {
    status: StatusCode,
    cookie: Option<String>,
    request_id: Option<String>,
    body: Value,
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<Reply> {
    let request = Request::builder().method(method).uri(uri);
    dispatch(app, request, token, body).await
}

async fn send_from(app: &Router, client_ip: &str, uri: &str) -> Result<Reply> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header("x-forwarded-for", client_ip);
    dispatch(app, request, None, None).await
}

async fn dispatch(
    app: &Router,
    mut request: axum::http::request::Builder,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<Reply> {
    if let Some(token) = token {
        request = request.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => request
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))?,
        None => request.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let header = |name| {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let cookie = header(SET_COOKIE);
    let request_id = header(axum::http::HeaderName::from_static("x-request-id"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).context("response body is not JSON")?
    };
    Ok(Reply {
        status,
        cookie,
        request_id,
        body,
    })
}

fn app(ctx: &TestContext) -> Result<Router> {
    api::app(ctx.services.clone(), StorageCheck::Memory)
}

#[tokio::test]
async fn health_reports_memory_storage() -> Result<()> {
    let ctx = TestContext::new()?;
    let app = app(&ctx)?;

    let reply = send(&app, Method::GET, "/health", None, None).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["database"], "memory");
    assert_eq!(reply.body["name"], env!("CARGO_PKG_NAME"));
    assert!(reply.request_id.is_some_and(|id| !id.is_empty()));
    Ok(())
}

#[tokio::test]
async fn register_verify_and_read_profile() -> Result<()> {
    let ctx = TestContext::new()?;
    let app = app(&ctx)?;

    let reply = send(
        &app,
        Method::POST,
        "/v1/auth/register",
        None,
        Some(json!({
            "email": "Ada@Example.com",
            "username": "ada",
            "password": PASSWORD,
            "display_name": "Ada Lovelace"
        })),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["delivered"], true);

    let duplicate = send(
        &app,
        Method::POST,
        "/v1/auth/register",
        None,
        Some(json!({
            "email": "ada@example.com",
            "username": "ada2",
            "password": PASSWORD,
            "display_name": "Ada Lovelace"
        })),
    )
    .await?;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let code = ctx.last_code("ada@example.com")?;
    let verified = send(
        &app,
        Method::POST,
        "/v1/auth/verify-email",
        None,
        Some(json!({ "email": "ada@example.com", "code": code })),
    )
    .await?;
    assert_eq!(verified.status, StatusCode::OK);
    assert!(verified.cookie.as_deref().is_some_and(
        |cookie| cookie.starts_with("turnstile_session=") && cookie.contains("HttpOnly")
    ));
    let token = verified.body["token"]
        .as_str()
        .context("session token missing")?
        .to_string();

    let anonymous = send(&app, Method::GET, "/v1/me", None, None).await?;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert!(anonymous.body["error"].is_string());

    let me = send(&app, Method::GET, "/v1/me", Some(&token), None).await?;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["email"], "ada@example.com");
    assert_eq!(me.body["role"], "user");
    assert_eq!(me.body["verified"], true);

    let admin_only = send(&app, Method::GET, "/v1/admin/users", Some(&token), None).await?;
    assert_eq!(admin_only.status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn admin_login_cooldown_is_429() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.admin("root@example.com").await?;
    let app = app(&ctx)?;
    let credentials = json!({ "email": "root@example.com", "password": ADMIN_PASSWORD });

    let first = send(
        &app,
        Method::POST,
        "/v1/admin/login",
        None,
        Some(credentials.clone()),
    )
    .await?;
    assert_eq!(first.status, StatusCode::ACCEPTED);
    assert_eq!(first.body["challenge_sent"], true);

    ctx.clock.advance(Duration::seconds(90));
    let second = send(&app, Method::POST, "/v1/admin/login", None, Some(credentials)).await?;
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.body["allowed"], false);
    assert_eq!(
        second.body["remaining_ms"],
        (Duration::minutes(30) - Duration::seconds(90)).num_milliseconds()
    );

    let status = send(
        &app,
        Method::GET,
        "/v1/admin/otp-status?email=root@example.com",
        None,
        None,
    )
    .await?;
    assert_eq!(status.status, StatusCode::OK);
    assert_eq!(status.body["can_resend"], true);
    assert_eq!(status.body["remaining_ms"], 0);

    let wrong = send(
        &app,
        Method::POST,
        "/v1/admin/login",
        None,
        Some(json!({ "email": "root@example.com", "password": "guess" })),
    )
    .await?;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn resend_replies_do_not_reveal_accounts() -> Result<()> {
    let ctx = TestContext::new()?;
    ctx.verified_user("ada@example.com", "ada", false).await?;
    let app = app(&ctx)?;

    let mut replies = Vec::new();
    for email in ["ada@example.com", "ghost@example.com"] {
        for uri in [
            "/v1/auth/password/forgot",
            "/v1/auth/resend-verification",
            "/v1/admin/resend",
            "/v1/vendor/resend",
        ] {
            let reply = send(&app, Method::POST, uri, None, Some(json!({ "email": email }))).await?;
            replies.push((uri, reply.status, reply.body));
        }
    }

    let (known, unknown) = replies.split_at(4);
    for ((uri, known_status, known_body), (_, unknown_status, unknown_body)) in
        known.iter().zip(unknown)
    {
        assert_eq!(known_status, unknown_status, "{uri}");
        assert_eq!(known_body, unknown_body, "{uri}");
    }
    Ok(())
}

#[tokio::test]
async fn clients_over_the_request_limit_get_429() -> Result<()> {
    let config = AuthConfig::new(FRONTEND.to_string())
        .with_request_limit(WindowLimit::from_seconds(3, 60))
        .with_reward_request_limit(WindowLimit::from_seconds(2, 60));
    let ctx = TestContext::with_config(config)?;
    let app = app(&ctx)?;

    for _ in 0..3 {
        let reply = send_from(&app, "198.51.100.7", "/health").await?;
        assert_eq!(reply.status, StatusCode::OK);
    }
    let limited = send_from(&app, "198.51.100.7", "/health").await?;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.body["remaining_ms"], 60_000);

    // Other clients keep their own window.
    let other = send_from(&app, "198.51.100.8", "/health").await?;
    assert_eq!(other.status, StatusCode::OK);

    ctx.clock.advance(Duration::seconds(60));
    let reopened = send_from(&app, "198.51.100.7", "/health").await?;
    assert_eq!(reopened.status, StatusCode::OK);

    // Reward routes hit the tighter limit first.
    for _ in 0..2 {
        let reply = send_from(&app, "203.0.113.5", "/v1/rewards/status").await?;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }
    let rewards = send_from(&app, "203.0.113.5", "/v1/rewards/status").await?;
    assert_eq!(rewards.status, StatusCode::TOO_MANY_REQUESTS);
    let health = send_from(&app, "203.0.113.5", "/health").await?;
    assert_eq!(health.status, StatusCode::OK);
    Ok(())
}
