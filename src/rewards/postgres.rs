use super::ledger::{
    ClaimRecord, ClaimUpdate, EarnedPrize, Prize, PrizeType, RewardAccount, RewardLedger,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, types::ipnetwork::IpNetwork, PgPool, Row};
use tracing::{info_span, Instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct PgRewardLedger {
    pool: PgPool,
}

impl PgRewardLedger {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RewardLedger for PgRewardLedger {
    async fn account(&self, principal_id: Uuid) -> Result<RewardAccount> {
        let query = r"
            SELECT principal_id, total_points, lifetime_points, consecutive_days, last_claim_at
            FROM reward_accounts
            WHERE principal_id = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(principal_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load reward account")?;
        match row {
            Some(row) => account_from_row(&row),
            None => Ok(RewardAccount::empty(principal_id)),
        }
    }

    async fn record_claim(
        &self,
        principal_id: Uuid,
        expected_last_claim: Option<DateTime<Utc>>,
        update: ClaimUpdate,
        record: ClaimRecord,
    ) -> Result<Option<RewardAccount>> {
        let mut tx = self.pool.begin().await.context("begin claim transaction")?;

        let query = r"
            INSERT INTO reward_accounts (principal_id)
            VALUES ($1)
            ON CONFLICT (principal_id) DO NOTHING
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(principal_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to ensure reward account")?;

        // IS NOT DISTINCT FROM treats NULL = NULL as a match for first claims.
        let query = r"
            UPDATE reward_accounts SET
                total_points = total_points + $3,
                lifetime_points = lifetime_points + $3,
                consecutive_days = $4,
                last_claim_at = $5
            WHERE principal_id = $1
              AND last_claim_at IS NOT DISTINCT FROM $2
            RETURNING principal_id, total_points, lifetime_points, consecutive_days, last_claim_at
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(principal_id)
            .bind(expected_last_claim)
            .bind(update.points)
            .bind(update.consecutive_days)
            .bind(update.claimed_at)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to update reward account")?;

        let Some(row) = row else {
            tx.rollback().await.context("rollback claim transaction")?;
            return Ok(None);
        };
        let account = account_from_row(&row)?;

        let query = r"
            INSERT INTO reward_claims
                (id, principal_id, slot, points, ip_address, user_agent, claimed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.id)
            .bind(record.principal_id)
            .bind(i16::from(record.slot))
            .bind(record.points)
            .bind(record.ip_address.map(IpNetwork::from))
            .bind(&record.user_agent)
            .bind(record.claimed_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert reward claim")?;

        tx.commit().await.context("commit claim transaction")?;
        Ok(Some(account))
    }

    async fn recent_claims(&self, principal_id: Uuid, limit: usize) -> Result<Vec<ClaimRecord>> {
        let query = r"
            SELECT id, principal_id, slot, points, ip_address, user_agent, claimed_at
            FROM reward_claims
            WHERE principal_id = $1
            ORDER BY claimed_at DESC
            LIMIT $2
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(principal_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list reward claims")?;

        rows.iter()
            .map(|row| {
                let slot: i16 = row.try_get("slot")?;
                let ip: Option<IpNetwork> = row.try_get("ip_address")?;
                Ok(ClaimRecord {
                    id: row.try_get("id")?,
                    principal_id: row.try_get("principal_id")?,
                    slot: u8::try_from(slot).context("slot out of range")?,
                    points: row.try_get("points")?,
                    ip_address: ip.map(|network| network.ip()),
                    user_agent: row.try_get("user_agent")?,
                    claimed_at: row.try_get("claimed_at")?,
                })
            })
            .collect()
    }

    async fn active_prizes(&self) -> Result<Vec<Prize>> {
        let query = r"
            SELECT id, name, description, points_threshold, prize_type, image_url,
                   is_active, total_redeemed
            FROM prizes
            WHERE is_active
            ORDER BY points_threshold
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list prizes")?;
        rows.iter().map(prize_from_row).collect()
    }

    async fn earned_prizes(&self, principal_id: Uuid) -> Result<Vec<EarnedPrize>> {
        let query = r"
            SELECT p.id, p.name, p.description, p.points_threshold, p.prize_type, p.image_url,
                   p.is_active, p.total_redeemed, e.earned_at
            FROM earned_prizes e
            JOIN prizes p ON p.id = e.prize_id
            WHERE e.principal_id = $1
            ORDER BY e.earned_at
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(principal_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list earned prizes")?;
        rows.iter()
            .map(|row| {
                Ok(EarnedPrize {
                    prize: prize_from_row(row)?,
                    earned_at: row.try_get("earned_at")?,
                })
            })
            .collect()
    }

    async fn award(
        &self,
        principal_id: Uuid,
        prize_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        if prize_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.pool.begin().await.context("begin award transaction")?;

        let query = r"
            INSERT INTO earned_prizes (principal_id, prize_id, earned_at)
            SELECT $1, prize_id, $3 FROM UNNEST($2::uuid[]) AS prize_id
            ON CONFLICT (principal_id, prize_id) DO NOTHING
            RETURNING prize_id
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(principal_id)
            .bind(prize_ids)
            .bind(at)
            .fetch_all(&mut *tx)
            .instrument(span)
            .await
            .context("failed to award prizes")?;
        let awarded: Vec<Uuid> = rows
            .iter()
            .map(|row| row.try_get("prize_id"))
            .collect::<Result<_, _>>()?;

        if !awarded.is_empty() {
            let query = "UPDATE prizes SET total_redeemed = total_redeemed + 1 WHERE id = ANY($1)";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(&awarded)
                .execute(&mut *tx)
                .instrument(span)
                .await
                .context("failed to count prize redemptions")?;
        }

        tx.commit().await.context("commit award transaction")?;
        Ok(awarded)
    }

    async fn ensure_prize(&self, prize: &Prize) -> Result<()> {
        let query = r"
            INSERT INTO prizes
                (id, name, description, points_threshold, prize_type, image_url,
                 is_active, total_redeemed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0)
            ON CONFLICT (name) DO NOTHING
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(prize.id)
            .bind(&prize.name)
            .bind(&prize.description)
            .bind(prize.points_threshold)
            .bind(prize.prize_type.as_str())
            .bind(&prize.image_url)
            .bind(prize.is_active)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to seed prize")?;
        Ok(())
    }
}

fn account_from_row(row: &PgRow) -> Result<RewardAccount> {
    Ok(RewardAccount {
        principal_id: row.try_get("principal_id")?,
        total_points: row.try_get("total_points")?,
        lifetime_points: row.try_get("lifetime_points")?,
        consecutive_days: row.try_get("consecutive_days")?,
        last_claim_at: row.try_get("last_claim_at")?,
    })
}

fn prize_from_row(row: &PgRow) -> Result<Prize> {
    let prize_type: String = row.try_get("prize_type")?;
    Ok(Prize {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        points_threshold: row.try_get("points_threshold")?,
        prize_type: PrizeType::parse(&prize_type)
            .ok_or_else(|| anyhow!("unknown prize type: {prize_type}"))?,
        image_url: row.try_get("image_url")?,
        is_active: row.try_get("is_active")?,
        total_redeemed: row.try_get("total_redeemed")?,
    })
}
