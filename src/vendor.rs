//! Vendor onboarding state machine.
//!
//! Legal edges:
//!
//! ```text
//! NEW ------submit-----> PENDING
//! PENDING --submit-----> PENDING   (details replaced)
//! REJECTED -submit-----> PENDING   (reason cleared)
//! PENDING --approve----> APPROVED  (role becomes vendor)
//! PENDING --reject-----> REJECTED
//! ```
//!
//! Every transition is a conditional update on the status observed when the
//! call started, so two admins acting on the same application cannot both
//! succeed. Notifications go out after the transition is stored and never
//! undo it.

use crate::{
    clock::Clock,
    email::{templates, EmailDispatcher, EmailMessage},
    error::{AuthError, VendorAction},
    model::{
        BusinessInfo, Precondition, Principal, PrincipalPatch, Role, VendorApproval, VendorStatus,
    },
    registry::{AccountRegistry, UpdateOutcome},
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_REJECTION_REASON: &str = "Please update your details";

/// Business details as submitted by the applicant.
#[derive(Debug, Clone)]
pub struct VendorApplication {
    pub business_name: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub phone: String,
    pub address: String,
}

impl VendorApplication {
    /// Validate and normalize into stored business info.
    ///
    /// # Errors
    /// `InvalidInput` naming the first missing field.
    pub fn into_business_info(self) -> Result<BusinessInfo, AuthError> {
        let required = [
            ("business name", &self.business_name),
            ("first name", &self.first_name),
            ("last name", &self.last_name),
            ("phone", &self.phone),
            ("address", &self.address),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(AuthError::InvalidInput(format!("{field} is required")));
            }
        }

        let owner_name = [
            Some(self.first_name.trim()),
            self.middle_name.as_deref().map(str::trim),
            Some(self.last_name.trim()),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

        Ok(BusinessInfo {
            name: self.business_name.trim().to_string(),
            owner_name,
            phone: self.phone.trim().to_string(),
            address: self.address.trim().to_string(),
        })
    }
}

/// Result of an admin decision.
#[derive(Debug, Clone)]
pub struct TransitionReceipt {
    pub vendor: Principal,
    /// Whether the notification email was accepted by the dispatcher.
    pub notified: bool,
}

/// Read-only projection of a principal's vendor sub-record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorView {
    pub status: VendorStatus,
    pub business: Option<BusinessInfo>,
    pub rejection_reason: Option<String>,
    pub approved_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl VendorView {
    #[must_use]
    pub fn of(principal: &Principal) -> Self {
        let vendor = principal.vendor.as_ref();
        Self {
            status: principal.vendor_status(),
            business: vendor.and_then(|vendor| vendor.business.clone()),
            rejection_reason: vendor.and_then(|vendor| vendor.rejection_reason.clone()),
            approved_at: vendor
                .and_then(|vendor| vendor.approval.as_ref())
                .map(|approval| approval.approved_at),
        }
    }
}

pub struct VendorLifecycle {
    registry: Arc<dyn AccountRegistry>,
    dispatcher: Arc<dyn EmailDispatcher>,
    clock: Arc<dyn Clock>,
    frontend_base_url: String,
}

impl VendorLifecycle {
    #[must_use]
    pub fn new(
        registry: Arc<dyn AccountRegistry>,
        dispatcher: Arc<dyn EmailDispatcher>,
        clock: Arc<dyn Clock>,
        frontend_base_url: String,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            clock,
            frontend_base_url: frontend_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Submit or resubmit business details for review.
    ///
    /// # Errors
    /// `Forbidden` for admins, `Unverified` for unverified principals,
    /// `InvalidTransition` once approved, `InvalidInput` for missing fields.
    pub async fn submit(
        &self,
        actor: &Principal,
        application: VendorApplication,
    ) -> Result<Principal, AuthError> {
        match actor.role {
            Role::Admin => return Err(AuthError::Forbidden),
            Role::User | Role::Vendor => {}
        }
        if !actor.verified {
            return Err(AuthError::Unverified);
        }
        let business = application.into_business_info()?;

        let from = actor.vendor_status();
        match from {
            VendorStatus::New | VendorStatus::Pending | VendorStatus::Rejected => {}
            VendorStatus::Approved => {
                return Err(AuthError::InvalidTransition {
                    from,
                    action: VendorAction::Submit,
                })
            }
        }

        let outcome = self
            .registry
            .update_atomic(
                actor.id,
                Precondition::VendorStatus(from),
                vec![PrincipalPatch::SubmitVendor(business)],
            )
            .await?;
        let updated = Self::applied(outcome, VendorAction::Submit)?;
        info!(principal_id = %actor.id, from = %from, "vendor application submitted");
        Ok(updated)
    }

    /// Approve a pending application.
    ///
    /// # Errors
    /// `Forbidden` unless `actor` is an admin, `NotFound`, `InvalidTransition`
    /// unless the application is pending.
    pub async fn approve(
        &self,
        actor: &Principal,
        vendor_id: Uuid,
    ) -> Result<TransitionReceipt, AuthError> {
        require_admin(actor)?;
        let approval = VendorApproval {
            approver_id: actor.id,
            approved_at: self.clock.now(),
        };
        let vendor = self
            .decide(vendor_id, VendorAction::Approve, PrincipalPatch::ApproveVendor(approval))
            .await?;
        info!(vendor_id = %vendor_id, approver_id = %actor.id, "vendor approved");

        let message = templates::vendor_approved(
            &vendor.email,
            &vendor.display_name,
            &format!("{}/vendor/login", self.frontend_base_url),
        );
        let notified = self.notify(&vendor, &message).await;
        Ok(TransitionReceipt { vendor, notified })
    }

    /// Reject a pending application. A blank reason falls back to
    /// [`DEFAULT_REJECTION_REASON`].
    ///
    /// # Errors
    /// Same as [`VendorLifecycle::approve`].
    pub async fn reject(
        &self,
        actor: &Principal,
        vendor_id: Uuid,
        reason: Option<String>,
    ) -> Result<TransitionReceipt, AuthError> {
        require_admin(actor)?;
        let reason = reason
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| DEFAULT_REJECTION_REASON.to_string());

        let vendor = self
            .decide(
                vendor_id,
                VendorAction::Reject,
                PrincipalPatch::RejectVendor {
                    reason: reason.clone(),
                },
            )
            .await?;
        info!(vendor_id = %vendor_id, admin_id = %actor.id, "vendor rejected");

        let message = templates::vendor_rejected(
            &vendor.email,
            &vendor.display_name,
            &reason,
            &format!("{}/vendor/apply", self.frontend_base_url),
        );
        let notified = self.notify(&vendor, &message).await;
        Ok(TransitionReceipt { vendor, notified })
    }

    /// # Errors
    /// `Forbidden` unless `actor` is an admin.
    pub async fn list_pending(&self, actor: &Principal) -> Result<Vec<Principal>, AuthError> {
        require_admin(actor)?;
        Ok(self
            .registry
            .list_by_vendor_status(VendorStatus::Pending)
            .await?)
    }

    /// # Errors
    /// `Forbidden` unless `actor` is an admin.
    pub async fn list_approved(&self, actor: &Principal) -> Result<Vec<Principal>, AuthError> {
        require_admin(actor)?;
        Ok(self
            .registry
            .list_by_vendor_status(VendorStatus::Approved)
            .await?)
    }

    /// The caller's own application state.
    ///
    /// # Errors
    /// `Forbidden` for admins, who have no vendor track.
    pub fn status(&self, actor: &Principal) -> Result<VendorView, AuthError> {
        match actor.role {
            Role::Admin => Err(AuthError::Forbidden),
            Role::User | Role::Vendor => Ok(VendorView::of(actor)),
        }
    }

    async fn decide(
        &self,
        vendor_id: Uuid,
        action: VendorAction,
        patch: PrincipalPatch,
    ) -> Result<Principal, AuthError> {
        let vendor = self
            .registry
            .find_by_id(vendor_id)
            .await?
            .ok_or(AuthError::NotFound)?;
        let from = vendor.vendor_status();
        if from != VendorStatus::Pending {
            return Err(AuthError::InvalidTransition { from, action });
        }
        let outcome = self
            .registry
            .update_atomic(
                vendor_id,
                Precondition::VendorStatus(VendorStatus::Pending),
                vec![patch],
            )
            .await?;
        Self::applied(outcome, action)
    }

    fn applied(outcome: UpdateOutcome, action: VendorAction) -> Result<Principal, AuthError> {
        match outcome {
            UpdateOutcome::Applied(principal) => Ok(principal),
            UpdateOutcome::Stale(current) => Err(AuthError::InvalidTransition {
                from: current.vendor_status(),
                action,
            }),
            UpdateOutcome::NotFound => Err(AuthError::NotFound),
        }
    }

    async fn notify(&self, vendor: &Principal, message: &EmailMessage) -> bool {
        match self.dispatcher.send(message).await {
            Ok(()) => true,
            Err(err) => {
                warn!(vendor_id = %vendor.id, "vendor notification failed: {err:#}");
                false
            }
        }
    }
}

/// # Errors
/// `Forbidden` unless the principal is an admin.
pub fn require_admin(actor: &Principal) -> Result<(), AuthError> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::User | Role::Vendor => Err(AuthError::Forbidden),
    }
}
