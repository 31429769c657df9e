//! Vendor login and application endpoints.

use super::{login_response, session_response, status_response, ApiResult};
use crate::{
    api::{
        session::require_principal,
        types::{
            AckResponse, ChallengeSentResponse, ChallengeStatusResponse, CodeRequest,
            EmailRequest, ErrorResponse, LoginRequest, SessionResponse, StatusQuery,
            ThrottledResponse, VendorApplicationRequest, VendorStatusResponse,
        },
    },
    model::ChallengePurpose,
    service::{LoginFlow, Services},
    vendor::VendorView,
};
use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

#[utoipa::path(
    post,
    path = "/v1/vendor/login",
    request_body = LoginRequest,
    responses(
        (status = 202, description = "Password accepted, code sent", body = ChallengeSentResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Email not verified", body = ErrorResponse),
        (status = 429, description = "Cooldown active", body = ThrottledResponse)
    ),
    tag = "vendor"
)]
pub async fn login(services: Extension<Services>, Json(request): Json<LoginRequest>) -> ApiResult {
    let outcome = services
        .auth
        .login(LoginFlow::Vendor, &request.email, &request.password)
        .await?;
    Ok(login_response(&services, &outcome))
}

#[utoipa::path(
    post,
    path = "/v1/vendor/verify",
    request_body = CodeRequest,
    responses(
        (status = 200, description = "Session started", body = SessionResponse),
        (status = 400, description = "Missing, expired or wrong code", body = ErrorResponse)
    ),
    tag = "vendor"
)]
pub async fn verify(services: Extension<Services>, Json(request): Json<CodeRequest>) -> ApiResult {
    let grant = services
        .auth
        .verify_login(LoginFlow::Vendor, &request.email, &request.code)
        .await?;
    Ok(session_response(&services, &grant))
}

#[utoipa::path(
    post,
    path = "/v1/vendor/resend",
    request_body = EmailRequest,
    responses(
        (status = 202, description = "Acknowledged", body = AckResponse)
    ),
    tag = "vendor"
)]
pub async fn resend(services: Extension<Services>, Json(request): Json<EmailRequest>) -> ApiResult {
    services
        .auth
        .resend_code(ChallengePurpose::VendorLogin, &request.email)
        .await;
    Ok((StatusCode::ACCEPTED, Json(AckResponse::code_requested())).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/vendor/otp-status",
    params(StatusQuery),
    responses(
        (status = 200, description = "Resend cooldown", body = ChallengeStatusResponse)
    ),
    tag = "vendor"
)]
pub async fn otp_status(
    services: Extension<Services>,
    Query(query): Query<StatusQuery>,
) -> ApiResult {
    let decision = services
        .auth
        .challenge_status(ChallengePurpose::VendorLogin, &query.email)
        .await?;
    Ok(status_response(&decision).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/vendor/application",
    request_body = VendorApplicationRequest,
    responses(
        (status = 200, description = "Application submitted", body = VendorStatusResponse),
        (status = 400, description = "Missing business details", body = ErrorResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 403, description = "Admin or unverified account", body = ErrorResponse),
        (status = 409, description = "Already approved", body = ErrorResponse)
    ),
    tag = "vendor"
)]
pub async fn submit_application(
    headers: HeaderMap,
    services: Extension<Services>,
    Json(request): Json<VendorApplicationRequest>,
) -> ApiResult {
    let actor = require_principal(&headers, &services).await?;
    let updated = services.vendors.submit(&actor, request.into()).await?;
    Ok(Json(VendorStatusResponse::from(VendorView::of(&updated))).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/vendor/application",
    responses(
        (status = 200, description = "Current application state", body = VendorStatusResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 403, description = "Admins have no application", body = ErrorResponse)
    ),
    tag = "vendor"
)]
pub async fn application_status(headers: HeaderMap, services: Extension<Services>) -> ApiResult {
    let actor = require_principal(&headers, &services).await?;
    let view = services.vendors.status(&actor)?;
    Ok(Json(VendorStatusResponse::from(view)).into_response())
}
