//! `PostgreSQL` registry.
//!
//! Conditional updates lock the row with `SELECT .. FOR UPDATE`, check the
//! precondition against the locked record and write it back in the same
//! transaction.

use super::{AccountRegistry, InsertOutcome, UpdateOutcome};
use crate::model::{
    AuthProvider, BusinessInfo, Challenge, ChallengePurpose, IssueLog, NewPrincipal,
    Precondition, Principal, PrincipalPatch, Role, VendorApproval, VendorRecord, VendorStatus,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgExecutor, PgPool, Row};
use tracing::{info_span, Instrument};
use uuid::Uuid;

macro_rules! principal_columns {
    () => {
        "id, email, username, display_name, mobile_number, password_hash, auth_provider, role, \
         is_verified, challenge_id, challenge_purpose, challenge_hash, challenge_issued_at, \
         challenge_expires_at, vendor_status, business_name, business_owner_name, business_phone, \
         business_address, vendor_approved_by, vendor_approved_at, vendor_rejection_reason, \
         last_login_at, admin_login_sent_at, vendor_login_sent_at, registration_sent_at, \
         password_reset_sent_at, created_at"
    };
}

#[derive(Clone)]
pub struct PgAccountRegistry {
    pool: PgPool,
}

impl PgAccountRegistry {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, query: &'static str, value: &str) -> Result<Option<Principal>> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup principal")?;
        row.as_ref().map(principal_from_row).transpose()
    }

    async fn list(&self, query: &'static str, value: &str) -> Result<Vec<Principal>> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(value)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list principals")?;
        rows.iter().map(principal_from_row).collect()
    }
}

#[async_trait]
impl AccountRegistry for PgAccountRegistry {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        const QUERY: &str = concat!(
            "SELECT ",
            principal_columns!(),
            " FROM principals WHERE email = $1"
        );
        self.find_one(QUERY, email).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        const QUERY: &str = concat!(
            "SELECT ",
            principal_columns!(),
            " FROM principals WHERE username = $1"
        );
        self.find_one(QUERY, username).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>> {
        const QUERY: &str = concat!(
            "SELECT ",
            principal_columns!(),
            " FROM principals WHERE id = $1"
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = QUERY
        );
        let row = sqlx::query(QUERY)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup principal by id")?;
        row.as_ref().map(principal_from_row).transpose()
    }

    async fn insert(&self, principal: NewPrincipal) -> Result<InsertOutcome> {
        const QUERY: &str = concat!(
            r"
            INSERT INTO principals
                (id, email, username, display_name, mobile_number, password_hash,
                 auth_provider, role, is_verified, vendor_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING ",
            principal_columns!()
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = QUERY
        );
        let vendor_status = principal.vendor_track.then_some(VendorStatus::New.as_str());
        let row = sqlx::query(QUERY)
            .bind(Uuid::now_v7())
            .bind(&principal.email)
            .bind(&principal.username)
            .bind(&principal.display_name)
            .bind(&principal.mobile_number)
            .bind(&principal.password_hash)
            .bind(principal.auth_provider.as_str())
            .bind(principal.role.as_str())
            .bind(principal.verified)
            .bind(vendor_status)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => Ok(InsertOutcome::Created(principal_from_row(&row)?)),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert principal"),
        }
    }

    async fn save(&self, principal: &Principal) -> Result<()> {
        write_principal(&self.pool, principal).await
    }

    async fn update_atomic(
        &self,
        id: Uuid,
        precondition: Precondition,
        patches: Vec<PrincipalPatch>,
    ) -> Result<UpdateOutcome> {
        const QUERY: &str = concat!(
            "SELECT ",
            principal_columns!(),
            " FROM principals WHERE id = $1 FOR UPDATE"
        );
        let mut tx = self.pool.begin().await.context("begin update transaction")?;

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = QUERY
        );
        let row = sqlx::query(QUERY)
            .bind(id)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lock principal")?;

        let Some(row) = row else {
            tx.rollback().await.context("rollback update transaction")?;
            return Ok(UpdateOutcome::NotFound);
        };
        let mut principal = principal_from_row(&row)?;

        if !precondition.holds(&principal) {
            tx.rollback().await.context("rollback update transaction")?;
            return Ok(UpdateOutcome::Stale(principal));
        }

        for patch in patches {
            principal.apply(patch);
        }
        write_principal(&mut *tx, &principal).await?;
        tx.commit().await.context("commit update transaction")?;

        Ok(UpdateOutcome::Applied(principal))
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<Principal>> {
        const QUERY: &str = concat!(
            "SELECT ",
            principal_columns!(),
            " FROM principals WHERE role = $1 ORDER BY created_at DESC"
        );
        self.list(QUERY, role.as_str()).await
    }

    async fn list_by_vendor_status(&self, status: VendorStatus) -> Result<Vec<Principal>> {
        const QUERY: &str = concat!(
            "SELECT ",
            principal_columns!(),
            " FROM principals WHERE vendor_status = $1 ORDER BY created_at DESC"
        );
        self.list(QUERY, status.as_str()).await
    }
}

const UPSERT_PRINCIPAL: &str = r"
    INSERT INTO principals
        (id, email, username, display_name, mobile_number, password_hash,
         auth_provider, role, is_verified, challenge_id, challenge_purpose,
         challenge_hash, challenge_issued_at, challenge_expires_at, vendor_status,
         business_name, business_owner_name, business_phone, business_address,
         vendor_approved_by, vendor_approved_at, vendor_rejection_reason,
         last_login_at, admin_login_sent_at, vendor_login_sent_at,
         registration_sent_at, password_reset_sent_at, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
            $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28)
    ON CONFLICT (id) DO UPDATE SET
        email = EXCLUDED.email,
        username = EXCLUDED.username,
        display_name = EXCLUDED.display_name,
        mobile_number = EXCLUDED.mobile_number,
        password_hash = EXCLUDED.password_hash,
        auth_provider = EXCLUDED.auth_provider,
        role = EXCLUDED.role,
        is_verified = EXCLUDED.is_verified,
        challenge_id = EXCLUDED.challenge_id,
        challenge_purpose = EXCLUDED.challenge_purpose,
        challenge_hash = EXCLUDED.challenge_hash,
        challenge_issued_at = EXCLUDED.challenge_issued_at,
        challenge_expires_at = EXCLUDED.challenge_expires_at,
        vendor_status = EXCLUDED.vendor_status,
        business_name = EXCLUDED.business_name,
        business_owner_name = EXCLUDED.business_owner_name,
        business_phone = EXCLUDED.business_phone,
        business_address = EXCLUDED.business_address,
        vendor_approved_by = EXCLUDED.vendor_approved_by,
        vendor_approved_at = EXCLUDED.vendor_approved_at,
        vendor_rejection_reason = EXCLUDED.vendor_rejection_reason,
        last_login_at = EXCLUDED.last_login_at,
        admin_login_sent_at = EXCLUDED.admin_login_sent_at,
        vendor_login_sent_at = EXCLUDED.vendor_login_sent_at,
        registration_sent_at = EXCLUDED.registration_sent_at,
        password_reset_sent_at = EXCLUDED.password_reset_sent_at,
        updated_at = NOW()
";

async fn write_principal<'e, E: PgExecutor<'e>>(executor: E, principal: &Principal) -> Result<()> {
    let query = UPSERT_PRINCIPAL;
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPSERT",
        db.statement = query
    );

    let challenge = principal.challenge.as_ref();
    let vendor = principal.vendor.as_ref();
    let business = vendor.and_then(|v| v.business.as_ref());
    let approval = vendor.and_then(|v| v.approval.as_ref());
    let issued = principal.issued;

    sqlx::query(query)
        .bind(principal.id)
        .bind(&principal.email)
        .bind(&principal.username)
        .bind(&principal.display_name)
        .bind(&principal.mobile_number)
        .bind(&principal.password_hash)
        .bind(principal.auth_provider.as_str())
        .bind(principal.role.as_str())
        .bind(principal.verified)
        .bind(challenge.map(|c| c.id))
        .bind(challenge.map(|c| c.purpose.as_str()))
        .bind(challenge.map(|c| c.code_hash.as_str()))
        .bind(challenge.map(|c| c.issued_at))
        .bind(challenge.map(|c| c.expires_at))
        .bind(vendor.map(|v| v.status.as_str()))
        .bind(business.map(|b| b.name.as_str()))
        .bind(business.map(|b| b.owner_name.as_str()))
        .bind(business.map(|b| b.phone.as_str()))
        .bind(business.map(|b| b.address.as_str()))
        .bind(approval.map(|a| a.approver_id))
        .bind(approval.map(|a| a.approved_at))
        .bind(vendor.and_then(|v| v.rejection_reason.as_deref()))
        .bind(principal.last_login_at)
        .bind(issued.admin_login)
        .bind(issued.vendor_login)
        .bind(issued.registration)
        .bind(issued.password_reset)
        .bind(principal.created_at)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to write principal")?;
    Ok(())
}

fn principal_from_row(row: &PgRow) -> Result<Principal> {
    let auth_provider: String = row.try_get("auth_provider")?;
    let role: String = row.try_get("role")?;

    let challenge_id: Option<Uuid> = row.try_get("challenge_id")?;
    let challenge = match challenge_id {
        Some(id) => {
            let purpose: String = row.try_get("challenge_purpose")?;
            let issued_at: Option<DateTime<Utc>> = row.try_get("challenge_issued_at")?;
            let expires_at: Option<DateTime<Utc>> = row.try_get("challenge_expires_at")?;
            let code_hash: Option<String> = row.try_get("challenge_hash")?;
            Some(Challenge {
                id,
                purpose: ChallengePurpose::parse(&purpose)
                    .ok_or_else(|| anyhow!("unknown challenge purpose: {purpose}"))?,
                code_hash: code_hash.context("challenge hash missing")?,
                issued_at: issued_at.context("challenge issued_at missing")?,
                expires_at: expires_at.context("challenge expires_at missing")?,
            })
        }
        None => None,
    };

    let vendor_status: Option<String> = row.try_get("vendor_status")?;
    let vendor = match vendor_status {
        Some(status) => {
            let status = VendorStatus::parse(&status)
                .ok_or_else(|| anyhow!("unknown vendor status: {status}"))?;
            let business_name: Option<String> = row.try_get("business_name")?;
            let business = match business_name {
                Some(name) => Some(BusinessInfo {
                    name,
                    owner_name: row
                        .try_get::<Option<String>, _>("business_owner_name")?
                        .unwrap_or_default(),
                    phone: row
                        .try_get::<Option<String>, _>("business_phone")?
                        .unwrap_or_default(),
                    address: row
                        .try_get::<Option<String>, _>("business_address")?
                        .unwrap_or_default(),
                }),
                None => None,
            };
            let approver_id: Option<Uuid> = row.try_get("vendor_approved_by")?;
            let approved_at: Option<DateTime<Utc>> = row.try_get("vendor_approved_at")?;
            Some(VendorRecord {
                status,
                business,
                approval: approver_id
                    .zip(approved_at)
                    .map(|(approver_id, approved_at)| VendorApproval {
                        approver_id,
                        approved_at,
                    }),
                rejection_reason: row.try_get("vendor_rejection_reason")?,
            })
        }
        None => None,
    };

    Ok(Principal {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        display_name: row.try_get("display_name")?,
        mobile_number: row.try_get("mobile_number")?,
        password_hash: row.try_get("password_hash")?,
        auth_provider: AuthProvider::parse(&auth_provider)
            .ok_or_else(|| anyhow!("unknown auth provider: {auth_provider}"))?,
        role: Role::parse(&role).ok_or_else(|| anyhow!("unknown role: {role}"))?,
        verified: row.try_get("is_verified")?,
        challenge,
        issued: IssueLog {
            admin_login: row.try_get("admin_login_sent_at")?,
            vendor_login: row.try_get("vendor_login_sent_at")?,
            registration: row.try_get("registration_sent_at")?,
            password_reset: row.try_get("password_reset_sent_at")?,
        },
        vendor,
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().is_some_and(|code| code.as_ref() == "23505")
        }
        _ => false,
    }
}
