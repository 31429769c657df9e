//! One-time code challenges.
//!
//! Flow Overview:
//! 1) `issue` checks the cooldown against the last issue of the same purpose,
//!    then swaps in a new challenge with a compare-and-set on the observed
//!    challenge id. Only the winner of that swap sends an email. Anonymous
//!    requests never displace a live code issued for another purpose.
//! 2) The code is emailed after the record is written. Under
//!    [`DispatchPolicy::Strict`] a failed or timed-out send restores the previous
//!    challenge and fails the call; under [`DispatchPolicy::BestEffort`] it is
//!    logged and the challenge stays.
//! 3) `verify` consumes the challenge with a compare-and-set on its id, so a
//!    verify racing a fresh `issue` never clears the newer challenge. Wrong codes
//!    leave the challenge in place and count towards a lockout; expired ones
//!    are cleared.

pub mod code;

use crate::{
    clock::Clock,
    email::{templates, EmailDispatcher},
    error::AuthError,
    gate::{self, GateDecision},
    limit::AttemptGuard,
    model::{Challenge, ChallengePurpose, Precondition, Principal, PrincipalPatch},
    registry::{AccountRegistry, UpdateOutcome},
};
use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use std::{fmt, str::FromStr, sync::Arc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use self::code::{generate_code, normalize_code, CodeHasher};

const ISSUE_ATTEMPTS: usize = 3;
pub const DEFAULT_VERIFY_ATTEMPT_LIMIT: u32 = 5;
pub const DEFAULT_VERIFY_LOCKOUT_SECONDS: i64 = 15 * 60;

/// Cooldown and code lifetime for one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengePolicy {
    pub cooldown: Duration,
    pub ttl: Duration,
}

impl ChallengePolicy {
    #[must_use]
    pub const fn new(cooldown: Duration, ttl: Duration) -> Self {
        Self { cooldown, ttl }
    }

    #[must_use]
    pub fn from_seconds(cooldown_seconds: i64, ttl_seconds: i64) -> Self {
        Self {
            cooldown: Duration::seconds(cooldown_seconds),
            ttl: Duration::seconds(ttl_seconds),
        }
    }
}

/// What a failed email send does to a freshly issued challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// Roll the challenge back and fail with `NotificationDispatch`.
    #[default]
    Strict,
    /// Keep the challenge, log, and report `delivered = false`.
    BestEffort,
}

impl fmt::Display for DispatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "strict",
            Self::BestEffort => "best-effort",
        })
    }
}

impl FromStr for DispatchPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "best-effort" | "best_effort" => Ok(Self::BestEffort),
            other => Err(format!("unknown dispatch policy: {other}")),
        }
    }
}

/// Who is asking for a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requester {
    /// The caller proved something first: a password or a fresh registration.
    Verified,
    /// Anyone who knows the email address. Never displaces a live code of
    /// another purpose.
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueReceipt {
    pub challenge_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub delivered: bool,
}

pub struct OtpChallengeEngine {
    registry: Arc<dyn AccountRegistry>,
    dispatcher: Arc<dyn EmailDispatcher>,
    clock: Arc<dyn Clock>,
    hasher: CodeHasher,
    attempts: AttemptGuard,
    dispatch_policy: DispatchPolicy,
    dispatch_timeout: std::time::Duration,
}

impl OtpChallengeEngine {
    #[must_use]
    pub fn new(
        registry: Arc<dyn AccountRegistry>,
        dispatcher: Arc<dyn EmailDispatcher>,
        clock: Arc<dyn Clock>,
        pepper: SecretString,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            clock,
            hasher: CodeHasher::new(pepper),
            attempts: AttemptGuard::new(
                DEFAULT_VERIFY_ATTEMPT_LIMIT,
                Duration::seconds(DEFAULT_VERIFY_LOCKOUT_SECONDS),
            ),
            dispatch_policy: DispatchPolicy::default(),
            dispatch_timeout: std::time::Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_dispatch_policy(mut self, policy: DispatchPolicy) -> Self {
        self.dispatch_policy = policy;
        self
    }

    #[must_use]
    pub fn with_dispatch_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Wrong codes allowed in a row before verification locks for `lockout`.
    #[must_use]
    pub fn with_attempt_limit(mut self, limit: u32, lockout: Duration) -> Self {
        self.attempts = AttemptGuard::new(limit, lockout);
        self
    }

    #[must_use]
    pub const fn dispatch_policy(&self) -> DispatchPolicy {
        self.dispatch_policy
    }

    /// Read-only cooldown projection for `purpose`.
    #[must_use]
    pub fn status(
        &self,
        principal: &Principal,
        purpose: ChallengePurpose,
        cooldown: Duration,
    ) -> GateDecision {
        gate::check(principal.issued.get(purpose), cooldown, self.clock.now())
    }

    /// Issue and email a new code, replacing the live challenge.
    ///
    /// # Errors
    /// `Throttled` while the cooldown for `purpose` runs (including losing a
    /// concurrent issue) or, for anonymous requests, while another purpose's
    /// code is live. `NotificationDispatch` under the strict policy,
    /// `Internal` on store failures.
    pub async fn issue(
        &self,
        principal: &Principal,
        purpose: ChallengePurpose,
        policy: ChallengePolicy,
        requester: Requester,
    ) -> Result<IssueReceipt, AuthError> {
        if policy.ttl <= Duration::zero() {
            return Err(AuthError::InvalidInput(
                "challenge ttl must be positive".to_string(),
            ));
        }

        let now = self.clock.now();
        let code = generate_code();
        let challenge = Challenge {
            id: Uuid::new_v4(),
            purpose,
            code_hash: self.hasher.digest(principal.id, purpose, &code)?,
            issued_at: now,
            expires_at: now + policy.ttl,
        };

        let replaced = self
            .swap_in(principal.clone(), &challenge, policy.cooldown, requester, now)
            .await?;

        let message = templates::challenge(&principal.email, purpose, &code, policy.ttl);
        let sent =
            tokio::time::timeout(self.dispatch_timeout, self.dispatcher.send(&message)).await;
        let failure = match sent {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(_) => Some(anyhow!(
                "email dispatch timed out after {}s",
                self.dispatch_timeout.as_secs()
            )),
        };

        let receipt = IssueReceipt {
            challenge_id: challenge.id,
            expires_at: challenge.expires_at,
            delivered: failure.is_none(),
        };

        let Some(err) = failure else {
            info!(
                principal_id = %principal.id,
                purpose = purpose.as_str(),
                "challenge issued"
            );
            return Ok(receipt);
        };

        match self.dispatch_policy {
            DispatchPolicy::Strict => {
                self.roll_back(principal.id, &challenge, replaced).await;
                warn!(
                    principal_id = %principal.id,
                    purpose = purpose.as_str(),
                    "challenge withdrawn after dispatch failure: {err:#}"
                );
                Err(AuthError::NotificationDispatch(err))
            }
            DispatchPolicy::BestEffort => {
                warn!(
                    principal_id = %principal.id,
                    purpose = purpose.as_str(),
                    "challenge kept despite dispatch failure: {err:#}"
                );
                Ok(receipt)
            }
        }
    }

    /// Gate and compare-and-set the new challenge.
    async fn swap_in(
        &self,
        mut observed: Principal,
        challenge: &Challenge,
        cooldown: Duration,
        requester: Requester,
        now: DateTime<Utc>,
    ) -> Result<Replaced, AuthError> {
        for _ in 0..ISSUE_ATTEMPTS {
            admit(&observed, challenge.purpose, cooldown, requester, now)?;

            let outcome = self
                .registry
                .update_atomic(
                    observed.id,
                    Precondition::ChallengeId(observed.challenge_id()),
                    vec![PrincipalPatch::SetChallenge(challenge.clone())],
                )
                .await?;

            match outcome {
                UpdateOutcome::Applied(_) => {
                    return Ok(Replaced {
                        challenge: observed.challenge,
                        issued_at: observed.issued.get(challenge.purpose),
                    })
                }
                UpdateOutcome::Stale(current) => observed = current,
                UpdateOutcome::NotFound => return Err(AuthError::NotFound),
            }
        }

        admit(&observed, challenge.purpose, cooldown, requester, now)?;
        Err(AuthError::Throttled {
            remaining: cooldown,
        })
    }

    async fn roll_back(&self, principal_id: Uuid, issued: &Challenge, replaced: Replaced) {
        let restore = replaced
            .challenge
            .map_or(PrincipalPatch::ClearChallenge, PrincipalPatch::SetChallenge);
        let patches = vec![
            restore,
            PrincipalPatch::SetIssuedAt {
                purpose: issued.purpose,
                at: replaced.issued_at,
            },
        ];
        match self
            .registry
            .update_atomic(principal_id, Precondition::ChallengeId(Some(issued.id)), patches)
            .await
        {
            Ok(UpdateOutcome::Applied(_)) => {}
            Ok(_) => warn!(%principal_id, "challenge changed before rollback, leaving it in place"),
            Err(err) => error!(%principal_id, "failed to roll back challenge: {err:#}"),
        }
    }

    /// Consume the live challenge for `purpose` if `code` matches.
    ///
    /// `on_success` patches are applied in the same atomic update that clears
    /// the challenge. Returns the updated principal.
    ///
    /// # Errors
    /// `NoChallenge`, `Expired` (challenge cleared), `Mismatch` (challenge kept),
    /// `TooManyAttempts` after repeated wrong codes, `Internal` on store failures.
    pub async fn verify(
        &self,
        principal: &Principal,
        purpose: ChallengePurpose,
        code: &str,
        on_success: Vec<PrincipalPatch>,
    ) -> Result<Principal, AuthError> {
        let now = self.clock.now();
        self.attempts
            .check(principal.id, now)
            .map_err(|remaining| AuthError::TooManyAttempts { remaining })?;

        let Some(challenge) = principal
            .challenge
            .as_ref()
            .filter(|challenge| challenge.purpose == purpose)
        else {
            return Err(AuthError::NoChallenge);
        };
        let scope = Precondition::ChallengeId(Some(challenge.id));

        if now >= challenge.expires_at {
            self.registry
                .update_atomic(principal.id, scope, vec![PrincipalPatch::ClearChallenge])
                .await?;
            return Err(AuthError::Expired);
        }

        let matched = normalize_code(code).is_some_and(|code| {
            self.hasher
                .matches(principal.id, purpose, code, &challenge.code_hash)
        });
        if !matched {
            let failures = self.attempts.record_failure(principal.id, now);
            debug!(
                principal_id = %principal.id,
                purpose = purpose.as_str(),
                failures,
                "wrong code"
            );
            return Err(AuthError::Mismatch);
        }

        let mut patches = Vec::with_capacity(on_success.len() + 1);
        patches.push(PrincipalPatch::ClearChallenge);
        patches.extend(on_success);

        match self.registry.update_atomic(principal.id, scope, patches).await? {
            UpdateOutcome::Applied(updated) => {
                self.attempts.reset(principal.id);
                info!(
                    principal_id = %principal.id,
                    purpose = purpose.as_str(),
                    "challenge consumed"
                );
                Ok(updated)
            }
            UpdateOutcome::Stale(_) | UpdateOutcome::NotFound => Err(AuthError::NoChallenge),
        }
    }

    /// Drop any live challenge and every cooldown, and forget wrong attempts.
    ///
    /// # Errors
    /// `NotFound` for unknown principals, `Internal` on store failures.
    pub async fn clear(&self, principal_id: Uuid) -> Result<(), AuthError> {
        let outcome = self
            .registry
            .update_atomic(
                principal_id,
                Precondition::Always,
                vec![PrincipalPatch::ResetCooldowns],
            )
            .await?;
        self.attempts.reset(principal_id);
        match outcome {
            UpdateOutcome::NotFound => Err(AuthError::NotFound),
            _ => Ok(()),
        }
    }
}

/// What an issue displaced, kept for a strict-policy rollback.
struct Replaced {
    challenge: Option<Challenge>,
    issued_at: Option<DateTime<Utc>>,
}

/// Cooldown of `purpose`, plus the anonymous rule on other purposes' codes.
fn admit(
    observed: &Principal,
    purpose: ChallengePurpose,
    cooldown: Duration,
    requester: Requester,
    now: DateTime<Utc>,
) -> Result<(), AuthError> {
    let decision = gate::check(observed.issued.get(purpose), cooldown, now);
    if !decision.allowed {
        return Err(AuthError::Throttled {
            remaining: decision.remaining,
        });
    }
    if requester == Requester::Anonymous {
        if let Some(live) = observed
            .challenge
            .as_ref()
            .filter(|live| live.purpose != purpose && now < live.expires_at)
        {
            return Err(AuthError::Throttled {
                remaining: live.expires_at - now,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        email::MemoryEmailDispatcher,
        model::{AuthProvider, NewPrincipal, Role},
        registry::{InsertOutcome, MemoryAccountRegistry},
    };
    use anyhow::Result;
    use chrono::TimeZone;

    struct Harness {
        registry: Arc<MemoryAccountRegistry>,
        mail: Arc<MemoryEmailDispatcher>,
        clock: Arc<ManualClock>,
        engine: OtpChallengeEngine,
    }

    impl Harness {
        fn new(policy: DispatchPolicy) -> Self {
            let clock = Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            ));
            let registry = Arc::new(MemoryAccountRegistry::with_clock(clock.clone()));
            let mail = Arc::new(MemoryEmailDispatcher::new());
            let engine = OtpChallengeEngine::new(
                registry.clone(),
                mail.clone(),
                clock.clone(),
                SecretString::from("pepper".to_string()),
            )
            .with_dispatch_policy(policy)
            .with_dispatch_timeout(std::time::Duration::from_millis(200));
            Self {
                registry,
                mail,
                clock,
                engine,
            }
        }

        async fn admin(&self) -> Result<Principal> {
            let outcome = self
                .registry
                .insert(NewPrincipal {
                    email: "root@example.com".to_string(),
                    username: "root".to_string(),
                    display_name: "Root".to_string(),
                    mobile_number: None,
                    password_hash: None,
                    auth_provider: AuthProvider::Local,
                    role: Role::Admin,
                    verified: true,
                    vendor_track: false,
                })
                .await?;
            match outcome {
                InsertOutcome::Created(principal) => Ok(principal),
                InsertOutcome::Conflict => anyhow::bail!("conflict"),
            }
        }

        async fn reload(&self, id: Uuid) -> Result<Principal> {
            self.registry
                .find_by_id(id)
                .await?
                .ok_or_else(|| anyhow!("principal vanished"))
        }

        fn last_code(&self) -> String {
            let sent = self.mail.sent();
            let body = &sent.last().unwrap().html_body;
            let start = body.find("<strong>").unwrap() + "<strong>".len();
            body[start..start + 6].to_string()
        }
    }

    fn policy() -> ChallengePolicy {
        ChallengePolicy::new(Duration::minutes(1), Duration::minutes(5))
    }

    #[tokio::test]
    async fn issue_then_verify_consumes_once() -> Result<()> {
        let h = Harness::new(DispatchPolicy::Strict);
        let admin = h.admin().await?;
        let receipt = h
            .engine
            .issue(&admin, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await?;
        assert!(receipt.delivered);
        assert_eq!(h.mail.sent().len(), 1);

        let stored = h.reload(admin.id).await?;
        let challenge = stored.challenge.clone().unwrap();
        assert_eq!(challenge.expires_at - challenge.issued_at, Duration::minutes(5));
        let code = h.last_code();
        assert_ne!(challenge.code_hash, code);

        let verified = h
            .engine
            .verify(&stored, ChallengePurpose::AdminLogin, &code, vec![])
            .await?;
        assert!(verified.challenge.is_none());

        let again = h
            .engine
            .verify(&h.reload(admin.id).await?, ChallengePurpose::AdminLogin, &code, vec![])
            .await;
        assert!(matches!(again, Err(AuthError::NoChallenge)));
        Ok(())
    }

    #[tokio::test]
    async fn replaying_a_stale_snapshot_cannot_consume_twice() -> Result<()> {
        let h = Harness::new(DispatchPolicy::Strict);
        let admin = h.admin().await?;
        h.engine
            .issue(&admin, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await?;
        let snapshot = h.reload(admin.id).await?;
        let code = h.last_code();

        h.engine
            .verify(&snapshot, ChallengePurpose::AdminLogin, &code, vec![])
            .await?;
        let replay = h
            .engine
            .verify(&snapshot, ChallengePurpose::AdminLogin, &code, vec![])
            .await;
        assert!(matches!(replay, Err(AuthError::NoChallenge)));
        Ok(())
    }

    #[tokio::test]
    async fn second_issue_within_window_is_throttled() -> Result<()> {
        let h = Harness::new(DispatchPolicy::Strict);
        let admin = h.admin().await?;
        h.engine
            .issue(&admin, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await?;

        let mut previous = i64::MAX;
        for seconds in [0, 20, 40, 59] {
            h.clock.set(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, seconds).unwrap());
            let stored = h.reload(admin.id).await?;
            let err = h
                .engine
                .issue(&stored, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
                .await
                .unwrap_err();
            let remaining = err.remaining_ms().unwrap();
            assert!(remaining < previous);
            previous = remaining;
        }

        h.clock.set(Utc.with_ymd_and_hms(2024, 3, 1, 9, 1, 0).unwrap());
        let stored = h.reload(admin.id).await?;
        let status = h
            .engine
            .status(&stored, ChallengePurpose::AdminLogin, policy().cooldown);
        assert!(status.allowed);
        h.engine
            .issue(&stored, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await?;
        assert_eq!(h.mail.sent().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_issue_sends_one_email() -> Result<()> {
        let h = Harness::new(DispatchPolicy::Strict);
        let admin = h.admin().await?;

        let (first, second) = tokio::join!(
            h.engine.issue(&admin, ChallengePurpose::AdminLogin, policy(), Requester::Verified),
            h.engine.issue(&admin, ChallengePurpose::AdminLogin, policy(), Requester::Verified),
        );
        let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!([&first, &second]
            .iter()
            .any(|r| matches!(r, Err(AuthError::Throttled { .. }))));
        assert_eq!(h.mail.sent().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn mismatch_keeps_challenge_until_correct_code() -> Result<()> {
        let h = Harness::new(DispatchPolicy::Strict);
        let admin = h.admin().await?;
        h.engine
            .issue(&admin, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await?;
        let code = h.last_code();
        let wrong = if code == "000000" { "000001" } else { "000000" };

        for _ in 0..3 {
            let stored = h.reload(admin.id).await?;
            let result = h
                .engine
                .verify(&stored, ChallengePurpose::AdminLogin, wrong, vec![])
                .await;
            assert!(matches!(result, Err(AuthError::Mismatch)));
        }
        let garbage = h
            .engine
            .verify(&h.reload(admin.id).await?, ChallengePurpose::AdminLogin, "abc", vec![])
            .await;
        assert!(matches!(garbage, Err(AuthError::Mismatch)));

        let stored = h.reload(admin.id).await?;
        h.engine
            .verify(&stored, ChallengePurpose::AdminLogin, &code, vec![])
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn expiry_boundary_is_inclusive_and_clears() -> Result<()> {
        let h = Harness::new(DispatchPolicy::Strict);
        let admin = h.admin().await?;
        let receipt = h
            .engine
            .issue(&admin, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await?;
        let code = h.last_code();

        h.clock.set(receipt.expires_at);
        let stored = h.reload(admin.id).await?;
        let result = h
            .engine
            .verify(&stored, ChallengePurpose::AdminLogin, &code, vec![])
            .await;
        assert!(matches!(result, Err(AuthError::Expired)));
        assert!(h.reload(admin.id).await?.challenge.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn purpose_mismatch_reads_as_no_challenge() -> Result<()> {
        let h = Harness::new(DispatchPolicy::Strict);
        let admin = h.admin().await?;
        h.engine
            .issue(&admin, ChallengePurpose::PasswordReset, policy(), Requester::Verified)
            .await?;
        let code = h.last_code();
        let stored = h.reload(admin.id).await?;
        let result = h
            .engine
            .verify(&stored, ChallengePurpose::AdminLogin, &code, vec![])
            .await;
        assert!(matches!(result, Err(AuthError::NoChallenge)));
        assert!(h.reload(admin.id).await?.challenge.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn strict_policy_restores_prior_challenge() -> Result<()> {
        let h = Harness::new(DispatchPolicy::Strict);
        let admin = h.admin().await?;
        h.engine
            .issue(&admin, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await?;
        let before = h.reload(admin.id).await?.challenge;

        h.clock.advance(Duration::minutes(2));
        h.mail.set_failing(true);
        let current = h.reload(admin.id).await?;
        let result = h
            .engine
            .issue(&current, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await;
        assert!(matches!(result, Err(AuthError::NotificationDispatch(_))));
        assert_eq!(h.reload(admin.id).await?.challenge, before);
        Ok(())
    }

    #[tokio::test]
    async fn strict_policy_times_out_slow_dispatch() -> Result<()> {
        let h = Harness::new(DispatchPolicy::Strict);
        let admin = h.admin().await?;
        h.mail.set_delay(Some(std::time::Duration::from_secs(5)));
        let result = h
            .engine
            .issue(&admin, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await;
        assert!(matches!(result, Err(AuthError::NotificationDispatch(_))));
        assert!(h.reload(admin.id).await?.challenge.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn best_effort_policy_keeps_challenge() -> Result<()> {
        let h = Harness::new(DispatchPolicy::BestEffort);
        let admin = h.admin().await?;
        h.mail.set_failing(true);
        let receipt = h
            .engine
            .issue(&admin, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await?;
        assert!(!receipt.delivered);
        let stored = h.reload(admin.id).await?;
        assert_eq!(stored.challenge_id(), Some(receipt.challenge_id));
        Ok(())
    }

    #[tokio::test]
    async fn verify_applies_follow_up_patches_atomically() -> Result<()> {
        let h = Harness::new(DispatchPolicy::Strict);
        let admin = h.admin().await?;
        h.engine
            .issue(&admin, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await?;
        let code = h.last_code();
        let at = h.clock.now();
        let updated = h
            .engine
            .verify(
                &h.reload(admin.id).await?,
                ChallengePurpose::AdminLogin,
                &code,
                vec![PrincipalPatch::RecordLogin(at)],
            )
            .await?;
        assert_eq!(updated.last_login_at, Some(at));
        assert!(updated.challenge.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn cooldowns_are_tracked_per_purpose() -> Result<()> {
        let h = Harness::new(DispatchPolicy::Strict);
        let admin = h.admin().await?;
        h.engine
            .issue(&admin, ChallengePurpose::PasswordReset, policy(), Requester::Anonymous)
            .await?;

        h.clock.advance(Duration::seconds(5));
        let stored = h.reload(admin.id).await?;
        let status = h
            .engine
            .status(&stored, ChallengePurpose::AdminLogin, Duration::minutes(30));
        assert!(status.allowed);
        h.engine
            .issue(&stored, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await?;

        let stored = h.reload(admin.id).await?;
        assert_eq!(
            stored.challenge.as_ref().map(|c| c.purpose),
            Some(ChallengePurpose::AdminLogin)
        );
        let reset = h
            .engine
            .status(&stored, ChallengePurpose::PasswordReset, policy().cooldown);
        assert_eq!(reset.remaining_ms(), 55_000);
        Ok(())
    }

    #[tokio::test]
    async fn anonymous_issue_leaves_other_live_code_alone() -> Result<()> {
        let h = Harness::new(DispatchPolicy::Strict);
        let admin = h.admin().await?;
        let receipt = h
            .engine
            .issue(&admin, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await?;

        let stored = h.reload(admin.id).await?;
        let err = h
            .engine
            .issue(&stored, ChallengePurpose::PasswordReset, policy(), Requester::Anonymous)
            .await
            .unwrap_err();
        assert_eq!(err.remaining_ms(), Some(5 * 60 * 1000));
        assert_eq!(h.reload(admin.id).await?.challenge_id(), Some(receipt.challenge_id));
        assert_eq!(h.mail.sent().len(), 1);

        h.clock.set(receipt.expires_at);
        let stored = h.reload(admin.id).await?;
        h.engine
            .issue(&stored, ChallengePurpose::PasswordReset, policy(), Requester::Anonymous)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn repeated_wrong_codes_lock_verification() -> Result<()> {
        let h = Harness::new(DispatchPolicy::Strict);
        let admin = h.admin().await?;
        h.engine
            .issue(&admin, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await?;
        let code = h.last_code();
        let wrong = if code == "000000" { "000001" } else { "000000" };

        for _ in 0..DEFAULT_VERIFY_ATTEMPT_LIMIT {
            let stored = h.reload(admin.id).await?;
            let result = h
                .engine
                .verify(&stored, ChallengePurpose::AdminLogin, wrong, vec![])
                .await;
            assert!(matches!(result, Err(AuthError::Mismatch)));
        }

        let stored = h.reload(admin.id).await?;
        let locked = h
            .engine
            .verify(&stored, ChallengePurpose::AdminLogin, &code, vec![])
            .await;
        assert!(matches!(locked, Err(AuthError::TooManyAttempts { .. })));
        assert!(h.reload(admin.id).await?.challenge.is_some());

        h.engine.clear(admin.id).await?;
        let stored = h.reload(admin.id).await?;
        assert_eq!(stored.issued, crate::model::IssueLog::default());
        h.engine
            .issue(&stored, ChallengePurpose::AdminLogin, policy(), Requester::Verified)
            .await?;
        let code = h.last_code();
        h.engine
            .verify(&h.reload(admin.id).await?, ChallengePurpose::AdminLogin, &code, vec![])
            .await?;
        Ok(())
    }

    #[test]
    fn dispatch_policy_parses() {
        assert_eq!("strict".parse::<DispatchPolicy>(), Ok(DispatchPolicy::Strict));
        assert_eq!(
            "Best-Effort".parse::<DispatchPolicy>(),
            Ok(DispatchPolicy::BestEffort)
        );
        assert!("sometimes".parse::<DispatchPolicy>().is_err());
    }
}
