//! Principal record and the patches that are allowed to change it.
//!
//! Every mutation of a stored principal goes through [`PrincipalPatch`]. There
//! is no patch that sets the role directly: the only way to become a vendor is
//! [`PrincipalPatch::ApproveVendor`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    Vendor,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::Vendor => "vendor",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            "vendor" => Some(Self::Vendor),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Local,
    External,
}

impl AuthProvider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::External => "external",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" => Some(Self::Local),
            "external" => Some(Self::External),
            _ => None,
        }
    }
}

/// What a challenge code unlocks. A code is only valid for its own purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePurpose {
    AdminLogin,
    VendorLogin,
    Registration,
    PasswordReset,
}

impl ChallengePurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AdminLogin => "admin_login",
            Self::VendorLogin => "vendor_login",
            Self::Registration => "registration",
            Self::PasswordReset => "password_reset",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin_login" => Some(Self::AdminLogin),
            "vendor_login" => Some(Self::VendorLogin),
            "registration" => Some(Self::Registration),
            "password_reset" => Some(Self::PasswordReset),
            _ => None,
        }
    }
}

/// When a code was last sent for each purpose.
///
/// Cooldowns only read the entry for their own purpose, so a code requested
/// for one flow never delays another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IssueLog {
    pub admin_login: Option<DateTime<Utc>>,
    pub vendor_login: Option<DateTime<Utc>>,
    pub registration: Option<DateTime<Utc>>,
    pub password_reset: Option<DateTime<Utc>>,
}

impl IssueLog {
    #[must_use]
    pub const fn get(&self, purpose: ChallengePurpose) -> Option<DateTime<Utc>> {
        match purpose {
            ChallengePurpose::AdminLogin => self.admin_login,
            ChallengePurpose::VendorLogin => self.vendor_login,
            ChallengePurpose::Registration => self.registration,
            ChallengePurpose::PasswordReset => self.password_reset,
        }
    }

    pub fn set(&mut self, purpose: ChallengePurpose, at: Option<DateTime<Utc>>) {
        let slot = match purpose {
            ChallengePurpose::AdminLogin => &mut self.admin_login,
            ChallengePurpose::VendorLogin => &mut self.vendor_login,
            ChallengePurpose::Registration => &mut self.registration,
            ChallengePurpose::PasswordReset => &mut self.password_reset,
        };
        *slot = at;
    }
}

/// The single live challenge of a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub id: Uuid,
    pub purpose: ChallengePurpose,
    pub code_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VendorStatus {
    New,
    Pending,
    Approved,
    Rejected,
}

impl VendorStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NEW" => Some(Self::New),
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for VendorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BusinessInfo {
    pub name: String,
    pub owner_name: String,
    pub phone: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VendorApproval {
    pub approver_id: Uuid,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorRecord {
    pub status: VendorStatus,
    pub business: Option<BusinessInfo>,
    pub approval: Option<VendorApproval>,
    pub rejection_reason: Option<String>,
}

impl VendorRecord {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: VendorStatus::New,
            business: None,
            approval: None,
            rejection_reason: None,
        }
    }
}

impl Default for VendorRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub mobile_number: Option<String>,
    pub password_hash: Option<String>,
    pub auth_provider: AuthProvider,
    pub role: Role,
    pub verified: bool,
    pub challenge: Option<Challenge>,
    pub issued: IssueLog,
    pub vendor: Option<VendorRecord>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Principal {
    /// Vendor status, reading a missing sub-record as `NEW`.
    #[must_use]
    pub fn vendor_status(&self) -> VendorStatus {
        self.vendor
            .as_ref()
            .map_or(VendorStatus::New, |vendor| vendor.status)
    }

    #[must_use]
    pub fn challenge_id(&self) -> Option<Uuid> {
        self.challenge.as_ref().map(|challenge| challenge.id)
    }

    /// Apply one patch in place. Preconditions are checked by the registry.
    pub fn apply(&mut self, patch: PrincipalPatch) {
        match patch {
            PrincipalPatch::SetChallenge(challenge) => {
                self.issued.set(challenge.purpose, Some(challenge.issued_at));
                self.challenge = Some(challenge);
            }
            PrincipalPatch::ClearChallenge => {
                if let Some(challenge) = self.challenge.take() {
                    self.issued.set(challenge.purpose, None);
                }
            }
            PrincipalPatch::SetIssuedAt { purpose, at } => self.issued.set(purpose, at),
            PrincipalPatch::ResetCooldowns => {
                self.challenge = None;
                self.issued = IssueLog::default();
            }
            PrincipalPatch::MarkVerified => self.verified = true,
            PrincipalPatch::SetPasswordHash(hash) => self.password_hash = Some(hash),
            PrincipalPatch::RecordLogin(at) => self.last_login_at = Some(at),
            PrincipalPatch::UpdateProfile {
                display_name,
                mobile_number,
            } => {
                if let Some(name) = display_name {
                    self.display_name = name;
                }
                if let Some(mobile) = mobile_number {
                    self.mobile_number = Some(mobile);
                }
            }
            PrincipalPatch::SubmitVendor(business) => {
                let vendor = self.vendor.get_or_insert_with(VendorRecord::new);
                vendor.status = VendorStatus::Pending;
                vendor.business = Some(business);
                vendor.rejection_reason = None;
            }
            PrincipalPatch::ApproveVendor(approval) => {
                let vendor = self.vendor.get_or_insert_with(VendorRecord::new);
                vendor.status = VendorStatus::Approved;
                vendor.approval = Some(approval);
                vendor.rejection_reason = None;
                self.role = Role::Vendor;
            }
            PrincipalPatch::RejectVendor { reason } => {
                let vendor = self.vendor.get_or_insert_with(VendorRecord::new);
                vendor.status = VendorStatus::Rejected;
                vendor.approval = None;
                vendor.rejection_reason = Some(reason);
            }
        }
    }
}

/// Field-level changes a registry applies atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrincipalPatch {
    /// Replace the live challenge and stamp its purpose in the issue log.
    SetChallenge(Challenge),
    /// Drop the live challenge and lift the cooldown of its purpose.
    ClearChallenge,
    SetIssuedAt {
        purpose: ChallengePurpose,
        at: Option<DateTime<Utc>>,
    },
    /// Drop the live challenge and every cooldown.
    ResetCooldowns,
    MarkVerified,
    SetPasswordHash(String),
    RecordLogin(DateTime<Utc>),
    UpdateProfile {
        display_name: Option<String>,
        mobile_number: Option<String>,
    },
    SubmitVendor(BusinessInfo),
    ApproveVendor(VendorApproval),
    RejectVendor {
        reason: String,
    },
}

/// Condition the stored record must satisfy for a patch set to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    Always,
    /// The live challenge id must equal this value (`None` = no challenge).
    ChallengeId(Option<Uuid>),
    VendorStatus(VendorStatus),
}

impl Precondition {
    #[must_use]
    pub fn holds(&self, principal: &Principal) -> bool {
        match self {
            Self::Always => true,
            Self::ChallengeId(expected) => principal.challenge_id() == *expected,
            Self::VendorStatus(expected) => principal.vendor_status() == *expected,
        }
    }
}

/// Fields supplied when creating a principal.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub mobile_number: Option<String>,
    pub password_hash: Option<String>,
    pub auth_provider: AuthProvider,
    pub role: Role,
    pub verified: bool,
    pub vendor_track: bool,
}

impl NewPrincipal {
    #[must_use]
    pub fn into_principal(self, id: Uuid, created_at: DateTime<Utc>) -> Principal {
        Principal {
            id,
            email: self.email,
            username: self.username,
            display_name: self.display_name,
            mobile_number: self.mobile_number,
            password_hash: self.password_hash,
            auth_provider: self.auth_provider,
            role: self.role,
            verified: self.verified,
            challenge: None,
            issued: IssueLog::default(),
            vendor: self.vendor_track.then(VendorRecord::new),
            last_login_at: None,
            created_at,
        }
    }
}
