//! Daily reward endpoints. Only `user` principals collect points.

use super::ApiResult;
use crate::{
    api::{
        session::{claim_context, require_principal, require_role},
        types::{ClaimRequest, ClaimResponse, ClaimStatusResponse, ErrorResponse, ThrottledResponse},
    },
    model::Role,
    rewards::{ClaimRecord, PrizeBoard, RewardAccount},
    service::Services,
};
use axum::{extract::Extension, http::HeaderMap, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Debug)]
pub struct PrizeBoardResponse {
    pub earned: Vec<crate::rewards::EarnedPrize>,
    pub available: Vec<crate::rewards::Prize>,
}

impl From<PrizeBoard> for PrizeBoardResponse {
    fn from(board: PrizeBoard) -> Self {
        Self {
            earned: board.earned,
            available: board.available,
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/rewards/claim",
    request_body = ClaimRequest,
    responses(
        (status = 200, description = "Points granted", body = ClaimResponse),
        (status = 400, description = "Slot out of range", body = ErrorResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 403, description = "Not a user account", body = ErrorResponse),
        (status = 429, description = "Already claimed today", body = ThrottledResponse)
    ),
    tag = "rewards"
)]
pub async fn claim(
    headers: HeaderMap,
    services: Extension<Services>,
    Json(request): Json<ClaimRequest>,
) -> ApiResult {
    let actor = require_principal(&headers, &services).await?;
    require_role(&actor, Role::User)?;
    let receipt = services
        .rewards
        .claim(&actor, request.slot, claim_context(&headers))
        .await?;
    Ok(Json(ClaimResponse::from(receipt)).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/rewards/status",
    responses(
        (status = 200, description = "Claim cooldown", body = ClaimStatusResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse)
    ),
    tag = "rewards"
)]
pub async fn status(headers: HeaderMap, services: Extension<Services>) -> ApiResult {
    let actor = require_principal(&headers, &services).await?;
    require_role(&actor, Role::User)?;
    let status = services.rewards.claim_status(&actor).await?;
    Ok(Json(ClaimStatusResponse::from(status)).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/rewards/points",
    responses(
        (status = 200, description = "Point totals and streak", body = RewardAccount),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse)
    ),
    tag = "rewards"
)]
pub async fn points(headers: HeaderMap, services: Extension<Services>) -> ApiResult {
    let actor = require_principal(&headers, &services).await?;
    require_role(&actor, Role::User)?;
    let account = services.rewards.points(&actor).await?;
    Ok(Json(account).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/rewards/prizes",
    responses(
        (status = 200, description = "Earned and available prizes", body = PrizeBoardResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse)
    ),
    tag = "rewards"
)]
pub async fn prizes(headers: HeaderMap, services: Extension<Services>) -> ApiResult {
    let actor = require_principal(&headers, &services).await?;
    require_role(&actor, Role::User)?;
    let board = services.rewards.prizes(&actor).await?;
    Ok(Json(PrizeBoardResponse::from(board)).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/rewards/history",
    responses(
        (status = 200, description = "Most recent claims", body = [ClaimRecord]),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse)
    ),
    tag = "rewards"
)]
pub async fn history(headers: HeaderMap, services: Extension<Services>) -> ApiResult {
    let actor = require_principal(&headers, &services).await?;
    require_role(&actor, Role::User)?;
    let history = services.rewards.history(&actor).await?;
    Ok(Json(history).into_response())
}
