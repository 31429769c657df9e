//! Request/response types for the HTTP surface.

use crate::{
    model::{BusinessInfo, Principal, Role, VendorStatus},
    rewards::{ClaimReceipt, ClaimStatus, Prize},
    service::SessionGrant,
    vendor::{VendorApplication, VendorView},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub mobile_number: Option<String>,
    /// Register as a vendor applicant.
    #[serde(default)]
    pub vendor: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterResponse {
    pub principal_id: Uuid,
    pub code_expires_at: DateTime<Utc>,
    pub delivered: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CodeRequest {
    pub email: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordResetRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

#[derive(Deserialize, Debug, IntoParams)]
pub struct StatusQuery {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ChallengeStatusResponse {
    pub can_resend: bool,
    pub remaining_ms: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChallengeSentResponse {
    pub challenge_sent: bool,
    pub expires_at: DateTime<Utc>,
    pub delivered: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct AckResponse {
    pub message: String,
}

impl AckResponse {
    #[must_use]
    pub fn code_requested() -> Self {
        Self {
            message: "If the account is eligible, a code has been sent".to_string(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ThrottledResponse {
    pub allowed: bool,
    pub remaining_ms: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct PrincipalView {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub mobile_number: Option<String>,
    pub role: Role,
    pub verified: bool,
    pub vendor_status: Option<VendorStatus>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Principal> for PrincipalView {
    fn from(principal: &Principal) -> Self {
        Self {
            id: principal.id,
            email: principal.email.clone(),
            username: principal.username.clone(),
            display_name: principal.display_name.clone(),
            mobile_number: principal.mobile_number.clone(),
            role: principal.role,
            verified: principal.verified,
            vendor_status: principal.vendor.as_ref().map(|vendor| vendor.status),
            last_login_at: principal.last_login_at,
            created_at: principal.created_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub principal: PrincipalView,
}

impl From<&SessionGrant> for SessionResponse {
    fn from(grant: &SessionGrant) -> Self {
        Self {
            token: grant.token.clone(),
            expires_at: grant.expires_at,
            principal: PrincipalView::from(&grant.principal),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ProfileUpdateRequest {
    pub display_name: Option<String>,
    pub mobile_number: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VendorApplicationRequest {
    pub business_name: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub phone: String,
    pub address: String,
}

impl From<VendorApplicationRequest> for VendorApplication {
    fn from(request: VendorApplicationRequest) -> Self {
        Self {
            business_name: request.business_name,
            first_name: request.first_name,
            middle_name: request.middle_name,
            last_name: request.last_name,
            phone: request.phone,
            address: request.address,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VendorStatusResponse {
    pub status: VendorStatus,
    pub business: Option<BusinessInfo>,
    pub rejection_reason: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl From<VendorView> for VendorStatusResponse {
    fn from(view: VendorView) -> Self {
        Self {
            status: view.status,
            business: view.business,
            rejection_reason: view.rejection_reason,
            approved_at: view.approved_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DecisionResponse {
    pub vendor: PrincipalView,
    pub notified: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ClaimRequest {
    pub slot: u8,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct ClaimResponse {
    pub points: i64,
    pub total_points: i64,
    pub consecutive_days: i32,
    pub next_claim_at: DateTime<Utc>,
    pub unlocked: Vec<Prize>,
}

impl From<ClaimReceipt> for ClaimResponse {
    fn from(receipt: ClaimReceipt) -> Self {
        Self {
            points: receipt.points,
            total_points: receipt.account.total_points,
            consecutive_days: receipt.account.consecutive_days,
            next_claim_at: receipt.next_claim_at,
            unlocked: receipt.unlocked,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ClaimStatusResponse {
    pub can_claim: bool,
    pub remaining_ms: i64,
    pub next_claim_at: Option<DateTime<Utc>>,
}

impl From<ClaimStatus> for ClaimStatusResponse {
    fn from(status: ClaimStatus) -> Self {
        Self {
            can_claim: status.decision.allowed,
            remaining_ms: status.decision.remaining_ms(),
            next_claim_at: status.next_claim_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;

    #[test]
    fn principal_view_hides_secrets() {
        let mut principal = fixtures::principal(Role::User);
        principal.password_hash = Some("$argon2id$secret".to_string());
        let json = serde_json::to_value(PrincipalView::from(&principal)).unwrap_or_default();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "user");
        assert!(json["vendor_status"].is_null());
    }

    #[test]
    fn register_request_defaults_vendor_flag() {
        let request: Result<RegisterRequest, _> = serde_json::from_str(
            r#"{"email":"a@b.io","username":"abc","password":"secret",
                "display_name":"A","mobile_number":null}"#,
        );
        assert!(request.is_ok_and(|request| !request.vendor));
    }
}
