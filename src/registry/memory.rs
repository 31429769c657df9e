use super::{AccountRegistry, InsertOutcome, UpdateOutcome};
use crate::clock::{Clock, SystemClock};
use crate::model::{NewPrincipal, Precondition, Principal, PrincipalPatch, Role, VendorStatus};
use anyhow::Result;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local registry. Backs tests and `--memory` development mode.
pub struct MemoryAccountRegistry {
    principals: RwLock<HashMap<Uuid, Principal>>,
    clock: Arc<dyn Clock>,
}

impl MemoryAccountRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            principals: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.principals.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.principals.read().await.is_empty()
    }
}

impl Default for MemoryAccountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountRegistry for MemoryAccountRegistry {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        let principals = self.principals.read().await;
        Ok(principals.values().find(|p| p.email == email).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        let principals = self.principals.read().await;
        Ok(principals.values().find(|p| p.username == username).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>> {
        Ok(self.principals.read().await.get(&id).cloned())
    }

    async fn insert(&self, principal: NewPrincipal) -> Result<InsertOutcome> {
        let mut principals = self.principals.write().await;
        let taken = principals
            .values()
            .any(|p| p.email == principal.email || p.username == principal.username);
        if taken {
            return Ok(InsertOutcome::Conflict);
        }
        let record = principal.into_principal(Uuid::now_v7(), self.clock.now());
        principals.insert(record.id, record.clone());
        Ok(InsertOutcome::Created(record))
    }

    async fn save(&self, principal: &Principal) -> Result<()> {
        self.principals
            .write()
            .await
            .insert(principal.id, principal.clone());
        Ok(())
    }

    async fn update_atomic(
        &self,
        id: Uuid,
        precondition: Precondition,
        patches: Vec<PrincipalPatch>,
    ) -> Result<UpdateOutcome> {
        let mut principals = self.principals.write().await;
        let Some(record) = principals.get_mut(&id) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if !precondition.holds(record) {
            return Ok(UpdateOutcome::Stale(record.clone()));
        }
        for patch in patches {
            record.apply(patch);
        }
        Ok(UpdateOutcome::Applied(record.clone()))
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<Principal>> {
        let principals = self.principals.read().await;
        let mut found: Vec<Principal> = principals
            .values()
            .filter(|p| p.role == role)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn list_by_vendor_status(&self, status: VendorStatus) -> Result<Vec<Principal>> {
        let principals = self.principals.read().await;
        let mut found: Vec<Principal> = principals
            .values()
            .filter(|p| p.vendor.as_ref().is_some_and(|v| v.status == status))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{AuthProvider, BusinessInfo};

    fn new_principal(email: &str, username: &str) -> NewPrincipal {
        NewPrincipal {
            email: email.to_string(),
            username: username.to_string(),
            display_name: "Name".to_string(),
            mobile_number: None,
            password_hash: None,
            auth_provider: AuthProvider::Local,
            role: Role::User,
            verified: false,
            vendor_track: false,
        }
    }

    #[tokio::test]
    async fn save_inserts_unknown_principal() -> Result<()> {
        let registry = MemoryAccountRegistry::new();
        let principal = crate::model::fixtures::principal(Role::Vendor);
        registry.save(&principal).await?;
        assert_eq!(registry.find_by_id(principal.id).await?, Some(principal));
        Ok(())
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_email_and_username() -> Result<()> {
        let registry = MemoryAccountRegistry::new();
        assert!(matches!(
            registry.insert(new_principal("a@x.io", "alice")).await?,
            InsertOutcome::Created(_)
        ));
        assert!(matches!(
            registry.insert(new_principal("a@x.io", "other")).await?,
            InsertOutcome::Conflict
        ));
        assert!(matches!(
            registry.insert(new_principal("b@x.io", "alice")).await?,
            InsertOutcome::Conflict
        ));
        assert_eq!(registry.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn stale_precondition_leaves_record_untouched() -> Result<()> {
        let registry = MemoryAccountRegistry::new();
        let outcome = registry.insert(new_principal("a@x.io", "alice")).await?;
        let InsertOutcome::Created(created) = outcome else {
            panic!("expected insert");
        };

        let outcome = registry
            .update_atomic(
                created.id,
                Precondition::VendorStatus(VendorStatus::Pending),
                vec![PrincipalPatch::MarkVerified],
            )
            .await?;
        assert!(matches!(outcome, UpdateOutcome::Stale(ref p) if !p.verified));

        let outcome = registry
            .update_atomic(
                created.id,
                Precondition::Always,
                vec![
                    PrincipalPatch::MarkVerified,
                    PrincipalPatch::SubmitVendor(BusinessInfo {
                        name: "Shop".to_string(),
                        owner_name: "Alice".to_string(),
                        phone: "1".to_string(),
                        address: "2".to_string(),
                    }),
                ],
            )
            .await?;
        assert!(matches!(outcome, UpdateOutcome::Applied(ref p) if p.verified));

        let pending = registry.list_by_vendor_status(VendorStatus::Pending).await?;
        assert_eq!(pending.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn update_missing_principal() -> Result<()> {
        let registry = MemoryAccountRegistry::new();
        let outcome = registry
            .update_atomic(Uuid::new_v4(), Precondition::Always, vec![])
            .await?;
        assert!(matches!(outcome, UpdateOutcome::NotFound));
        Ok(())
    }
}
