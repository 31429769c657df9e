//! Daily reward claims.
//!
//! A claim draws weighted-random points, at most once per cooldown window
//! (24h by default) through the same [`crate::gate`] rule the challenge
//! engine uses. The ledger applies the claim with a compare-and-set on
//! `last_claim_at`, so two taps racing each other grant points once. Prizes
//! whose threshold the new total reaches are awarded exactly once.

pub mod draw;
pub mod ledger;
mod postgres;

pub use ledger::{
    ClaimRecord, ClaimUpdate, EarnedPrize, MemoryRewardLedger, Prize, PrizeType, RewardAccount,
    RewardLedger,
};
pub use postgres::PgRewardLedger;

use crate::{
    clock::Clock,
    error::AuthError,
    gate::{self, GateDecision},
    model::Principal,
};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::{collections::HashSet, net::IpAddr, sync::Arc};
use tracing::info;
use uuid::Uuid;

pub const SLOT_COUNT: u8 = 5;
pub const DEFAULT_COOLDOWN_SECONDS: i64 = 24 * 60 * 60;
const HISTORY_LIMIT: usize = 30;

/// Request metadata stored with each claim.
#[derive(Debug, Clone, Default)]
pub struct ClaimContext {
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClaimReceipt {
    pub points: i64,
    pub account: RewardAccount,
    pub next_claim_at: DateTime<Utc>,
    pub unlocked: Vec<Prize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimStatus {
    pub decision: GateDecision,
    pub next_claim_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PrizeBoard {
    pub earned: Vec<EarnedPrize>,
    pub available: Vec<Prize>,
}

pub struct RewardEngine {
    ledger: Arc<dyn RewardLedger>,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
}

impl RewardEngine {
    #[must_use]
    pub fn new(ledger: Arc<dyn RewardLedger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger,
            clock,
            cooldown: Duration::seconds(DEFAULT_COOLDOWN_SECONDS),
        }
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Claim today's points by tapping `slot` (0..=4).
    ///
    /// # Errors
    /// `InvalidInput` for a bad slot, `Throttled` inside the cooldown (also
    /// when a concurrent claim won), `Internal` on ledger failures.
    pub async fn claim(
        &self,
        actor: &Principal,
        slot: u8,
        context: ClaimContext,
    ) -> Result<ClaimReceipt, AuthError> {
        if slot >= SLOT_COUNT {
            return Err(AuthError::InvalidInput(format!(
                "slot must be between 0 and {}",
                SLOT_COUNT - 1
            )));
        }

        let now = self.clock.now();
        let account = self.ledger.account(actor.id).await?;
        let decision = gate::check(account.last_claim_at, self.cooldown, now);
        if !decision.allowed {
            return Err(AuthError::Throttled {
                remaining: decision.remaining,
            });
        }

        let points = draw::draw_points(&mut rand::thread_rng());
        let update = ClaimUpdate {
            points,
            consecutive_days: next_streak(account.last_claim_at, account.consecutive_days, now),
            claimed_at: now,
        };
        let record = ClaimRecord {
            id: Uuid::now_v7(),
            principal_id: actor.id,
            slot,
            points,
            ip_address: context.ip_address,
            user_agent: context.user_agent,
            claimed_at: now,
        };

        let Some(updated) = self
            .ledger
            .record_claim(actor.id, account.last_claim_at, update, record)
            .await?
        else {
            let current = self.ledger.account(actor.id).await?;
            let decision = gate::check(current.last_claim_at, self.cooldown, now);
            return Err(AuthError::Throttled {
                remaining: decision.remaining,
            });
        };

        let unlocked = self.unlock(actor.id, updated.total_points, now).await?;
        info!(
            principal_id = %actor.id,
            points,
            total_points = updated.total_points,
            unlocked = unlocked.len(),
            "reward claimed"
        );

        Ok(ClaimReceipt {
            points,
            account: updated,
            next_claim_at: now + self.cooldown,
            unlocked,
        })
    }

    async fn unlock(
        &self,
        principal_id: Uuid,
        total_points: i64,
        at: DateTime<Utc>,
    ) -> Result<Vec<Prize>> {
        let earned: HashSet<Uuid> = self
            .ledger
            .earned_prizes(principal_id)
            .await?
            .into_iter()
            .map(|earned| earned.prize.id)
            .collect();
        let reachable: Vec<Prize> = self
            .ledger
            .active_prizes()
            .await?
            .into_iter()
            .filter(|prize| prize.points_threshold <= total_points && !earned.contains(&prize.id))
            .collect();
        if reachable.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = reachable.iter().map(|prize| prize.id).collect();
        let awarded = self.ledger.award(principal_id, &ids, at).await?;
        Ok(reachable
            .into_iter()
            .filter(|prize| awarded.contains(&prize.id))
            .collect())
    }

    /// # Errors
    /// `Internal` on ledger failures.
    pub async fn claim_status(&self, actor: &Principal) -> Result<ClaimStatus, AuthError> {
        let account = self.ledger.account(actor.id).await?;
        let decision = gate::check(account.last_claim_at, self.cooldown, self.clock.now());
        Ok(ClaimStatus {
            decision,
            next_claim_at: account.last_claim_at.map(|last| last + self.cooldown),
        })
    }

    /// # Errors
    /// `Internal` on ledger failures.
    pub async fn points(&self, actor: &Principal) -> Result<RewardAccount, AuthError> {
        Ok(self.ledger.account(actor.id).await?)
    }

    /// # Errors
    /// `Internal` on ledger failures.
    pub async fn history(&self, actor: &Principal) -> Result<Vec<ClaimRecord>, AuthError> {
        Ok(self.ledger.recent_claims(actor.id, HISTORY_LIMIT).await?)
    }

    /// # Errors
    /// `Internal` on ledger failures.
    pub async fn prizes(&self, actor: &Principal) -> Result<PrizeBoard, AuthError> {
        let earned = self.ledger.earned_prizes(actor.id).await?;
        let earned_ids: HashSet<Uuid> = earned.iter().map(|e| e.prize.id).collect();
        let available = self
            .ledger
            .active_prizes()
            .await?
            .into_iter()
            .filter(|prize| !earned_ids.contains(&prize.id))
            .collect();
        Ok(PrizeBoard { earned, available })
    }

    /// Insert the Bronze, Silver and Gold badges if missing.
    ///
    /// # Errors
    /// Returns an error if the ledger rejects the insert.
    pub async fn seed_default_prizes(&self) -> Result<()> {
        for prize in default_prizes() {
            self.ledger.ensure_prize(&prize).await?;
        }
        Ok(())
    }
}

/// Streak after a claim at `now`: +1 the day after the previous claim, kept on
/// the same day, reset to 1 after a gap.
#[must_use]
pub fn next_streak(last_claim_at: Option<DateTime<Utc>>, current: i32, now: DateTime<Utc>) -> i32 {
    let Some(last) = last_claim_at else {
        return 1;
    };
    let days = (now.date_naive() - last.date_naive()).num_days();
    match days {
        1 => current.saturating_add(1).max(1),
        d if d <= 0 => current.max(1),
        _ => 1,
    }
}

#[must_use]
pub fn default_prizes() -> Vec<Prize> {
    [
        ("Bronze Badge", "Earned by reaching 100 points", 100),
        ("Silver Badge", "Earned by reaching 500 points", 500),
        ("Gold Badge", "Earned by reaching 1000 points", 1000),
    ]
    .into_iter()
    .map(|(name, description, threshold)| Prize {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: description.to_string(),
        points_threshold: threshold,
        prize_type: PrizeType::Badge,
        image_url: None,
        is_active: true,
        total_redeemed: 0,
    })
    .collect()
}
