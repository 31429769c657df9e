//! Route handlers and the response helpers they share.

pub mod admin;
pub mod auth;
pub mod health;
pub mod rewards;
pub mod vendor;

use super::{
    error::ApiError,
    session::session_cookie,
    types::{ChallengeSentResponse, ChallengeStatusResponse, SessionResponse},
};
use crate::{
    gate::GateDecision,
    otp::IssueReceipt,
    service::{LoginOutcome, SessionGrant, Services},
};
use axum::{
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

/// JSON session body plus the session cookie.
pub(crate) fn session_response(services: &Services, grant: &SessionGrant) -> Response {
    let mut headers = HeaderMap::new();
    match session_cookie(services.auth.config(), grant) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build session cookie: {err}"),
    }
    (StatusCode::OK, headers, Json(SessionResponse::from(grant))).into_response()
}

pub(crate) fn challenge_response(receipt: &IssueReceipt) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(ChallengeSentResponse {
            challenge_sent: true,
            expires_at: receipt.expires_at,
            delivered: receipt.delivered,
        }),
    )
        .into_response()
}

pub(crate) fn login_response(services: &Services, outcome: &LoginOutcome) -> Response {
    match outcome {
        LoginOutcome::Authenticated(grant) => session_response(services, grant),
        LoginOutcome::ChallengeSent(receipt) => challenge_response(receipt),
    }
}

pub(crate) fn status_response(decision: &GateDecision) -> Json<ChallengeStatusResponse> {
    Json(ChallengeStatusResponse {
        can_resend: decision.allowed,
        remaining_ms: decision.remaining_ms(),
    })
}

pub(crate) type ApiResult = Result<Response, ApiError>;
