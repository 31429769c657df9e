//! Registration, user login, password reset and profile endpoints.

use super::{login_response, session_response, status_response, ApiResult};
use crate::{
    api::{
        session::{clear_session_cookie, require_principal},
        types::{
            AckResponse, ChallengeStatusResponse, CodeRequest, EmailRequest, ErrorResponse,
            LoginRequest, PasswordResetRequest, PrincipalView, ProfileUpdateRequest,
            RegisterRequest, RegisterResponse, SessionResponse, StatusQuery, ThrottledResponse,
        },
    },
    model::ChallengePurpose,
    service::{LoginFlow, Registration, Services},
};
use axum::{
    extract::{Extension, Query},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, code sent", body = RegisterResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 409, description = "Email or username taken", body = ErrorResponse),
        (status = 502, description = "Verification email could not be sent", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn register(
    services: Extension<Services>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult {
    let receipt = services
        .auth
        .register(Registration {
            email: request.email,
            username: request.username,
            password: request.password,
            display_name: request.display_name,
            mobile_number: request.mobile_number,
            vendor_track: request.vendor,
        })
        .await?;
    let body = RegisterResponse {
        principal_id: receipt.principal.id,
        code_expires_at: receipt.challenge.expires_at,
        delivered: receipt.challenge.delivered,
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/verify-email",
    request_body = CodeRequest,
    responses(
        (status = 200, description = "Email verified, session started", body = SessionResponse),
        (status = 400, description = "Missing, expired or wrong code", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    services: Extension<Services>,
    Json(request): Json<CodeRequest>,
) -> ApiResult {
    let grant = services
        .auth
        .verify_registration(&request.email, &request.code)
        .await?;
    Ok(session_response(&services, &grant))
}

#[utoipa::path(
    post,
    path = "/v1/auth/resend-verification",
    request_body = EmailRequest,
    responses(
        (status = 202, description = "Acknowledged", body = AckResponse)
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    services: Extension<Services>,
    Json(request): Json<EmailRequest>,
) -> ApiResult {
    services.auth.resend_registration(&request.email).await;
    Ok((StatusCode::ACCEPTED, Json(AckResponse::code_requested())).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/auth/verification-status",
    params(StatusQuery),
    responses(
        (status = 200, description = "Resend cooldown", body = ChallengeStatusResponse)
    ),
    tag = "auth"
)]
pub async fn verification_status(
    services: Extension<Services>,
    Query(query): Query<StatusQuery>,
) -> ApiResult {
    let decision = services
        .auth
        .challenge_status(ChallengePurpose::Registration, &query.email)
        .await?;
    Ok(status_response(&decision).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session started", body = SessionResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Email not verified", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(services: Extension<Services>, Json(request): Json<LoginRequest>) -> ApiResult {
    let outcome = services
        .auth
        .login(LoginFlow::User, &request.email, &request.password)
        .await?;
    Ok(login_response(&services, &outcome))
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/forgot",
    request_body = EmailRequest,
    responses(
        (status = 202, description = "Acknowledged", body = AckResponse)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    services: Extension<Services>,
    Json(request): Json<EmailRequest>,
) -> ApiResult {
    services.auth.request_password_reset(&request.email).await;
    Ok((StatusCode::ACCEPTED, Json(AckResponse::code_requested())).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Invalid code or password", body = ErrorResponse),
        (status = 429, description = "Cooldown active", body = ThrottledResponse)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    services: Extension<Services>,
    Json(request): Json<PasswordResetRequest>,
) -> ApiResult {
    services
        .auth
        .reset_password(&request.email, &request.code, &request.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Current principal", body = PrincipalView),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn me(headers: HeaderMap, services: Extension<Services>) -> ApiResult {
    let principal = require_principal(&headers, &services).await?;
    Ok(Json(PrincipalView::from(&principal)).into_response())
}

#[utoipa::path(
    patch,
    path = "/v1/me",
    request_body = ProfileUpdateRequest,
    responses(
        (status = 200, description = "Profile updated", body = PrincipalView),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn update_me(
    headers: HeaderMap,
    services: Extension<Services>,
    Json(request): Json<ProfileUpdateRequest>,
) -> ApiResult {
    let principal = require_principal(&headers, &services).await?;
    let updated = services
        .auth
        .update_profile(
            &principal,
            request.display_name.as_deref(),
            request.mobile_number.as_deref(),
        )
        .await?;
    Ok(Json(PrincipalView::from(&updated)).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cookie cleared")
    ),
    tag = "auth"
)]
pub async fn logout(services: Extension<Services>) -> impl IntoResponse {
    // Tokens are stateless; clearing the cookie is all there is to do.
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(services.auth.config()) {
        headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, headers)
}
