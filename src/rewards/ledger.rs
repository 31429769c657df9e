//! Reward persistence contract and the in-memory ledger.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    net::IpAddr,
};
use tokio::sync::Mutex;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RewardAccount {
    pub principal_id: Uuid,
    pub total_points: i64,
    pub lifetime_points: i64,
    pub consecutive_days: i32,
    pub last_claim_at: Option<DateTime<Utc>>,
}

impl RewardAccount {
    #[must_use]
    pub const fn empty(principal_id: Uuid) -> Self {
        Self {
            principal_id,
            total_points: 0,
            lifetime_points: 0,
            consecutive_days: 0,
            last_claim_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PrizeType {
    Badge,
    Discount,
    Item,
    Special,
}

impl PrizeType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Badge => "badge",
            Self::Discount => "discount",
            Self::Item => "item",
            Self::Special => "special",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "badge" => Some(Self::Badge),
            "discount" => Some(Self::Discount),
            "item" => Some(Self::Item),
            "special" => Some(Self::Special),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Prize {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub points_threshold: i64,
    pub prize_type: PrizeType,
    pub image_url: Option<String>,
    pub is_active: bool,
    pub total_redeemed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct EarnedPrize {
    pub prize: Prize,
    pub earned_at: DateTime<Utc>,
}

/// One tap on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ClaimRecord {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub slot: u8,
    pub points: i64,
    #[schema(value_type = Option<String>)]
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub claimed_at: DateTime<Utc>,
}

/// Account changes for a successful claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimUpdate {
    pub points: i64,
    pub consecutive_days: i32,
    pub claimed_at: DateTime<Utc>,
}

#[async_trait]
pub trait RewardLedger: Send + Sync {
    /// Current account, or an empty one if the principal never claimed.
    async fn account(&self, principal_id: Uuid) -> Result<RewardAccount>;

    /// Apply a claim if `last_claim_at` still equals `expected_last_claim`.
    /// Returns `None` when another claim got there first.
    async fn record_claim(
        &self,
        principal_id: Uuid,
        expected_last_claim: Option<DateTime<Utc>>,
        update: ClaimUpdate,
        record: ClaimRecord,
    ) -> Result<Option<RewardAccount>>;

    async fn recent_claims(&self, principal_id: Uuid, limit: usize) -> Result<Vec<ClaimRecord>>;

    async fn active_prizes(&self) -> Result<Vec<Prize>>;

    async fn earned_prizes(&self, principal_id: Uuid) -> Result<Vec<EarnedPrize>>;

    /// Mark prizes earned. Already earned ones are skipped; returns the ids
    /// that were newly awarded.
    async fn award(
        &self,
        principal_id: Uuid,
        prize_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>>;

    /// Insert a prize unless one with the same name exists.
    async fn ensure_prize(&self, prize: &Prize) -> Result<()>;
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Uuid, RewardAccount>,
    claims: Vec<ClaimRecord>,
    prizes: Vec<Prize>,
    earned: HashMap<Uuid, Vec<(Uuid, DateTime<Utc>)>>,
}

#[derive(Default)]
pub struct MemoryRewardLedger {
    state: Mutex<LedgerState>,
}

impl MemoryRewardLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RewardLedger for MemoryRewardLedger {
    async fn account(&self, principal_id: Uuid) -> Result<RewardAccount> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .get(&principal_id)
            .cloned()
            .unwrap_or_else(|| RewardAccount::empty(principal_id)))
    }

    async fn record_claim(
        &self,
        principal_id: Uuid,
        expected_last_claim: Option<DateTime<Utc>>,
        update: ClaimUpdate,
        record: ClaimRecord,
    ) -> Result<Option<RewardAccount>> {
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .entry(principal_id)
            .or_insert_with(|| RewardAccount::empty(principal_id));
        if account.last_claim_at != expected_last_claim {
            return Ok(None);
        }
        account.total_points += update.points;
        account.lifetime_points += update.points;
        account.consecutive_days = update.consecutive_days;
        account.last_claim_at = Some(update.claimed_at);
        let updated = account.clone();
        state.claims.push(record);
        Ok(Some(updated))
    }

    async fn recent_claims(&self, principal_id: Uuid, limit: usize) -> Result<Vec<ClaimRecord>> {
        let state = self.state.lock().await;
        let mut claims: Vec<ClaimRecord> = state
            .claims
            .iter()
            .filter(|claim| claim.principal_id == principal_id)
            .cloned()
            .collect();
        claims.sort_by(|a, b| b.claimed_at.cmp(&a.claimed_at));
        claims.truncate(limit);
        Ok(claims)
    }

    async fn active_prizes(&self) -> Result<Vec<Prize>> {
        let state = self.state.lock().await;
        let mut prizes: Vec<Prize> = state.prizes.iter().filter(|p| p.is_active).cloned().collect();
        prizes.sort_by_key(|p| p.points_threshold);
        Ok(prizes)
    }

    async fn earned_prizes(&self, principal_id: Uuid) -> Result<Vec<EarnedPrize>> {
        let state = self.state.lock().await;
        let Some(earned) = state.earned.get(&principal_id) else {
            return Ok(Vec::new());
        };
        Ok(earned
            .iter()
            .filter_map(|(prize_id, earned_at)| {
                state
                    .prizes
                    .iter()
                    .find(|p| p.id == *prize_id)
                    .map(|prize| EarnedPrize {
                        prize: prize.clone(),
                        earned_at: *earned_at,
                    })
            })
            .collect())
    }

    async fn award(
        &self,
        principal_id: Uuid,
        prize_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let mut state = self.state.lock().await;
        let already: HashSet<Uuid> = state
            .earned
            .get(&principal_id)
            .map(|earned| earned.iter().map(|(id, _)| *id).collect())
            .unwrap_or_default();

        let mut awarded = Vec::new();
        for prize_id in prize_ids {
            if already.contains(prize_id) || awarded.contains(prize_id) {
                continue;
            }
            let Some(prize) = state.prizes.iter_mut().find(|p| p.id == *prize_id) else {
                continue;
            };
            prize.total_redeemed += 1;
            awarded.push(*prize_id);
        }
        state
            .earned
            .entry(principal_id)
            .or_default()
            .extend(awarded.iter().map(|id| (*id, at)));
        Ok(awarded)
    }

    async fn ensure_prize(&self, prize: &Prize) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.prizes.iter().any(|p| p.name == prize.name) {
            state.prizes.push(prize.clone());
        }
        Ok(())
    }
}
