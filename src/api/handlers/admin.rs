//! Admin login and vendor review endpoints.

use super::{login_response, session_response, status_response, ApiResult};
use crate::{
    api::{
        session::require_principal,
        types::{
            AckResponse, ChallengeSentResponse, ChallengeStatusResponse, CodeRequest,
            DecisionResponse, EmailRequest, ErrorResponse, LoginRequest, PrincipalView,
            RejectRequest, SessionResponse, StatusQuery, ThrottledResponse,
        },
    },
    model::{ChallengePurpose, Principal},
    service::{LoginFlow, Services},
    vendor::TransitionReceipt,
};
use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/v1/admin/login",
    request_body = LoginRequest,
    responses(
        (status = 202, description = "Password accepted, code sent", body = ChallengeSentResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 429, description = "Cooldown active", body = ThrottledResponse),
        (status = 502, description = "Code could not be sent", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn login(services: Extension<Services>, Json(request): Json<LoginRequest>) -> ApiResult {
    let outcome = services
        .auth
        .login(LoginFlow::Admin, &request.email, &request.password)
        .await?;
    Ok(login_response(&services, &outcome))
}

#[utoipa::path(
    post,
    path = "/v1/admin/verify",
    request_body = CodeRequest,
    responses(
        (status = 200, description = "Session started", body = SessionResponse),
        (status = 400, description = "Missing, expired or wrong code", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn verify(services: Extension<Services>, Json(request): Json<CodeRequest>) -> ApiResult {
    let grant = services
        .auth
        .verify_login(LoginFlow::Admin, &request.email, &request.code)
        .await?;
    Ok(session_response(&services, &grant))
}

#[utoipa::path(
    post,
    path = "/v1/admin/resend",
    request_body = EmailRequest,
    responses(
        (status = 202, description = "Acknowledged", body = AckResponse)
    ),
    tag = "admin"
)]
pub async fn resend(services: Extension<Services>, Json(request): Json<EmailRequest>) -> ApiResult {
    services
        .auth
        .resend_code(ChallengePurpose::AdminLogin, &request.email)
        .await;
    Ok((StatusCode::ACCEPTED, Json(AckResponse::code_requested())).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/admin/otp-status",
    params(StatusQuery),
    responses(
        (status = 200, description = "Resend cooldown", body = ChallengeStatusResponse)
    ),
    tag = "admin"
)]
pub async fn otp_status(
    services: Extension<Services>,
    Query(query): Query<StatusQuery>,
) -> ApiResult {
    let decision = services
        .auth
        .challenge_status(ChallengePurpose::AdminLogin, &query.email)
        .await?;
    Ok(status_response(&decision).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/admin/users",
    responses(
        (status = 200, description = "Registered users", body = [PrincipalView]),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 403, description = "Not an admin", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn users(headers: HeaderMap, services: Extension<Services>) -> ApiResult {
    let actor = require_principal(&headers, &services).await?;
    let users = services.auth.list_users(&actor).await?;
    Ok(views(&users))
}

#[utoipa::path(
    get,
    path = "/v1/admin/admins",
    responses(
        (status = 200, description = "Administrators", body = [PrincipalView]),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 403, description = "Not an admin", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn admins(headers: HeaderMap, services: Extension<Services>) -> ApiResult {
    let actor = require_principal(&headers, &services).await?;
    let admins = services.auth.list_admins(&actor).await?;
    Ok(views(&admins))
}

#[utoipa::path(
    get,
    path = "/v1/admin/vendors/pending",
    responses(
        (status = 200, description = "Applications awaiting review", body = [PrincipalView]),
        (status = 403, description = "Not an admin", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn pending_vendors(headers: HeaderMap, services: Extension<Services>) -> ApiResult {
    let actor = require_principal(&headers, &services).await?;
    let pending = services.vendors.list_pending(&actor).await?;
    Ok(views(&pending))
}

#[utoipa::path(
    get,
    path = "/v1/admin/vendors/approved",
    responses(
        (status = 200, description = "Approved vendors", body = [PrincipalView]),
        (status = 403, description = "Not an admin", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn approved_vendors(headers: HeaderMap, services: Extension<Services>) -> ApiResult {
    let actor = require_principal(&headers, &services).await?;
    let approved = services.vendors.list_approved(&actor).await?;
    Ok(views(&approved))
}

#[utoipa::path(
    post,
    path = "/v1/admin/vendors/{id}/approve",
    params(("id" = Uuid, Path, description = "Vendor principal id")),
    responses(
        (status = 200, description = "Application approved", body = DecisionResponse),
        (status = 403, description = "Not an admin", body = ErrorResponse),
        (status = 404, description = "Unknown principal", body = ErrorResponse),
        (status = 409, description = "Application is not pending", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn approve_vendor(
    headers: HeaderMap,
    services: Extension<Services>,
    Path(id): Path<Uuid>,
) -> ApiResult {
    let actor = require_principal(&headers, &services).await?;
    let receipt = services.vendors.approve(&actor, id).await?;
    Ok(decision(&receipt))
}

#[utoipa::path(
    post,
    path = "/v1/admin/vendors/{id}/reject",
    params(("id" = Uuid, Path, description = "Vendor principal id")),
    request_body = RejectRequest,
    responses(
        (status = 200, description = "Application rejected", body = DecisionResponse),
        (status = 403, description = "Not an admin", body = ErrorResponse),
        (status = 404, description = "Unknown principal", body = ErrorResponse),
        (status = 409, description = "Application is not pending", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn reject_vendor(
    headers: HeaderMap,
    services: Extension<Services>,
    Path(id): Path<Uuid>,
    payload: Option<Json<RejectRequest>>,
) -> ApiResult {
    let actor = require_principal(&headers, &services).await?;
    let reason = payload.and_then(|Json(request)| request.reason);
    let receipt = services.vendors.reject(&actor, id, reason).await?;
    Ok(decision(&receipt))
}

fn views(principals: &[Principal]) -> axum::response::Response {
    Json(principals.iter().map(PrincipalView::from).collect::<Vec<_>>()).into_response()
}

fn decision(receipt: &TransitionReceipt) -> axum::response::Response {
    Json(DecisionResponse {
        vendor: PrincipalView::from(&receipt.vendor),
        notified: receipt.notified,
    })
    .into_response()
}
