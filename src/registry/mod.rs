//! Account storage contract.
//!
//! Implementations must apply an [`AccountRegistry::update_atomic`] call as one
//! unit: precondition check and every patch, or nothing.

mod memory;
mod postgres;

pub use memory::MemoryAccountRegistry;
pub use postgres::PgAccountRegistry;

use crate::model::{NewPrincipal, Precondition, Principal, PrincipalPatch, Role, VendorStatus};
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug)]
pub enum InsertOutcome {
    Created(Principal),
    Conflict,
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Applied(Principal),
    /// The precondition did not hold; carries the record as currently stored.
    Stale(Principal),
    NotFound,
}

#[async_trait]
pub trait AccountRegistry: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>>;

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>>;

    /// Create a principal. Email and username are unique.
    async fn insert(&self, principal: NewPrincipal) -> Result<InsertOutcome>;

    /// Write the full record, inserting it when the id is unknown.
    async fn save(&self, principal: &Principal) -> Result<()>;

    async fn update_atomic(
        &self,
        id: Uuid,
        precondition: Precondition,
        patches: Vec<PrincipalPatch>,
    ) -> Result<UpdateOutcome>;

    async fn list_by_role(&self, role: Role) -> Result<Vec<Principal>>;

    async fn list_by_vendor_status(&self, status: VendorStatus) -> Result<Vec<Principal>>;
}
