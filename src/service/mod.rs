//! Account flows built on the challenge engine and the session issuer.
//!
//! Flow Overview:
//! 1) Registration creates an unverified principal and mails a registration
//!    code; verifying it marks the principal verified and starts a session.
//! 2) User login goes straight from password to session. Admin and vendor
//!    logins stop at a challenge and finish with `verify_login`.
//! 3) Resend and password-reset requests acknowledge at once, whatever the
//!    account state. The lookup and the send run afterwards as tracked
//!    background work, so neither the reply nor its latency reveals accounts.
//! 4) `authenticate` turns a bearer token back into the stored principal and
//!    rejects tokens whose role no longer matches.

pub mod config;
mod deferred;
pub mod validate;

pub use config::{AuthConfig, ChallengeFlow};

use crate::{
    clock::Clock,
    credential::CredentialVerifier,
    email::EmailDispatcher,
    error::AuthError,
    gate::GateDecision,
    model::{
        AuthProvider, ChallengePurpose, NewPrincipal, Precondition, Principal, PrincipalPatch,
        Role,
    },
    otp::{ChallengePolicy, IssueReceipt, OtpChallengeEngine, Requester},
    registry::{AccountRegistry, InsertOutcome, UpdateOutcome},
    rewards::{RewardEngine, RewardLedger},
    token::SessionTokenIssuer,
    vendor::{require_admin, VendorLifecycle},
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::{fmt, sync::Arc};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use self::deferred::Deferred;
use self::validate::{
    normalize_email, optional_mobile, require_email, require_name, require_password,
    require_username,
};

/// Which login surface a request came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFlow {
    User,
    Vendor,
    Admin,
}

impl LoginFlow {
    /// Whether a principal may sign in through this flow at all.
    #[must_use]
    pub fn admits(self, principal: &Principal) -> bool {
        match (self, principal.role) {
            (Self::User, Role::User)
            | (Self::Vendor, Role::Vendor)
            | (Self::Admin, Role::Admin) => true,
            // Applicants sign in as vendors to submit or fix their details.
            (Self::Vendor, Role::User) => principal.vendor.is_some(),
            (Self::User, Role::Vendor | Role::Admin)
            | (Self::Vendor, Role::Admin)
            | (Self::Admin, Role::User | Role::Vendor) => false,
        }
    }

    /// Challenge purpose for flows that require a second step.
    #[must_use]
    pub const fn purpose(self) -> Option<ChallengePurpose> {
        match self {
            Self::User => None,
            Self::Vendor => Some(ChallengePurpose::VendorLogin),
            Self::Admin => Some(ChallengePurpose::AdminLogin),
        }
    }

    const fn login_policy(self) -> Option<ChallengeFlow> {
        match self {
            Self::User => None,
            Self::Vendor => Some(ChallengeFlow::VendorLogin),
            Self::Admin => Some(ChallengeFlow::AdminLogin),
        }
    }
}

impl fmt::Display for LoginFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Vendor => "vendor",
            Self::Admin => "admin",
        })
    }
}

/// Policy used when a code is re-sent or polled for `purpose`.
#[must_use]
pub const fn resend_flow(purpose: ChallengePurpose) -> ChallengeFlow {
    match purpose {
        ChallengePurpose::AdminLogin => ChallengeFlow::AdminResend,
        ChallengePurpose::VendorLogin => ChallengeFlow::VendorResend,
        ChallengePurpose::Registration => ChallengeFlow::Registration,
        ChallengePurpose::PasswordReset => ChallengeFlow::PasswordReset,
    }
}

/// A started session.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub principal: Principal,
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(SessionGrant),
    ChallengeSent(IssueReceipt),
}

/// Uniform reply for enumeration-sensitive requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledged;

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub mobile_number: Option<String>,
    pub vendor_track: bool,
}

#[derive(Debug, Clone)]
pub struct RegistrationReceipt {
    pub principal: Principal,
    pub challenge: IssueReceipt,
}

/// Input for provisioning an administrator from the command line.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub password: String,
}

pub struct AuthService {
    config: AuthConfig,
    registry: Arc<dyn AccountRegistry>,
    credentials: Arc<CredentialVerifier>,
    otp: Arc<OtpChallengeEngine>,
    tokens: Arc<SessionTokenIssuer>,
    clock: Arc<dyn Clock>,
    deferred: Deferred,
}

impl AuthService {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        registry: Arc<dyn AccountRegistry>,
        credentials: Arc<CredentialVerifier>,
        otp: Arc<OtpChallengeEngine>,
        tokens: Arc<SessionTokenIssuer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            registry,
            credentials,
            otp,
            tokens,
            clock,
            deferred: Deferred::default(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Create an unverified user and mail a registration code.
    ///
    /// # Errors
    /// `InvalidInput` for malformed fields, `Conflict` when the email or
    /// username is taken, `NotificationDispatch` when the code could not be
    /// sent under the strict policy (the account stays; use resend).
    pub async fn register(
        &self,
        registration: Registration,
    ) -> Result<RegistrationReceipt, AuthError> {
        let email = require_email(&registration.email)?;
        let username = require_username(&registration.username)?;
        require_password(&registration.password, self.config.min_password_length())?;
        let display_name = require_name(&registration.display_name)?;
        let mobile_number = optional_mobile(registration.mobile_number.as_deref())?;

        let password_hash = self.hash_password(&registration.password).await?;
        let outcome = self
            .registry
            .insert(NewPrincipal {
                email,
                username,
                display_name,
                mobile_number,
                password_hash: Some(password_hash),
                auth_provider: AuthProvider::Local,
                role: Role::User,
                verified: false,
                vendor_track: registration.vendor_track,
            })
            .await?;
        let principal = match outcome {
            InsertOutcome::Created(principal) => principal,
            InsertOutcome::Conflict => return Err(AuthError::Conflict),
        };
        info!(
            principal_id = %principal.id,
            vendor_track = registration.vendor_track,
            "principal registered"
        );

        let challenge = self
            .otp
            .issue(
                &principal,
                ChallengePurpose::Registration,
                self.config.policy(ChallengeFlow::Registration),
                Requester::Verified,
            )
            .await?;
        Ok(RegistrationReceipt {
            principal,
            challenge,
        })
    }

    /// Consume the registration code, mark the principal verified and start a
    /// session.
    ///
    /// # Errors
    /// `NoChallenge`, `Expired` or `Mismatch` from the challenge engine.
    pub async fn verify_registration(
        &self,
        email: &str,
        code: &str,
    ) -> Result<SessionGrant, AuthError> {
        let principal = self
            .registry
            .find_by_email(&normalize_email(email))
            .await?
            .ok_or(AuthError::NoChallenge)?;
        let verified = self
            .otp
            .verify(
                &principal,
                ChallengePurpose::Registration,
                code,
                vec![
                    PrincipalPatch::MarkVerified,
                    PrincipalPatch::RecordLogin(self.clock.now()),
                ],
            )
            .await?;
        info!(principal_id = %verified.id, "email verified");
        self.grant(verified)
    }

    /// Check the password and either start a session or send a code.
    ///
    /// # Errors
    /// `InvalidCredentials` for unknown principals, wrong passwords and
    /// principals the flow does not admit; `Unverified` once the password
    /// checks out on an unverified account; challenge errors for two-step
    /// flows.
    pub async fn login(
        &self,
        flow: LoginFlow,
        email: &str,
        password: &str,
    ) -> Result<LoginOutcome, AuthError> {
        let principal = self.registry.find_by_email(&normalize_email(email)).await?;
        let digest = principal
            .as_ref()
            .and_then(|principal| principal.password_hash.clone());
        let password_ok = self.verify_password(password, digest).await?;

        let Some(principal) = principal.filter(|_| password_ok) else {
            debug!(%flow, "login rejected");
            return Err(AuthError::InvalidCredentials);
        };
        if !flow.admits(&principal) {
            debug!(%flow, principal_id = %principal.id, "login flow does not admit principal");
            return Err(AuthError::InvalidCredentials);
        }
        if !principal.verified {
            return Err(AuthError::Unverified);
        }

        match (flow.purpose(), flow.login_policy()) {
            (Some(purpose), Some(policy)) => {
                let receipt = self
                    .otp
                    .issue(
                        &principal,
                        purpose,
                        self.config.policy(policy),
                        Requester::Verified,
                    )
                    .await?;
                Ok(LoginOutcome::ChallengeSent(receipt))
            }
            _ => {
                let grant = self.start_session(principal.id).await?;
                info!(principal_id = %grant.principal.id, %flow, "login succeeded");
                Ok(LoginOutcome::Authenticated(grant))
            }
        }
    }

    /// Finish a two-step login.
    ///
    /// # Errors
    /// `InvalidInput` for the user flow, otherwise challenge errors. Unknown
    /// principals read as `NoChallenge`.
    pub async fn verify_login(
        &self,
        flow: LoginFlow,
        email: &str,
        code: &str,
    ) -> Result<SessionGrant, AuthError> {
        let purpose = flow
            .purpose()
            .ok_or_else(|| AuthError::InvalidInput(format!("{flow} login does not use codes")))?;
        let principal = self
            .registry
            .find_by_email(&normalize_email(email))
            .await?
            .filter(|principal| flow.admits(principal))
            .ok_or(AuthError::NoChallenge)?;
        let updated = self
            .otp
            .verify(
                &principal,
                purpose,
                code,
                vec![PrincipalPatch::RecordLogin(self.clock.now())],
            )
            .await?;
        info!(principal_id = %updated.id, %flow, "login verified");
        self.grant(updated)
    }

    /// Acknowledge, then send a fresh code for `purpose` if the account is
    /// eligible.
    ///
    /// The lookup and the send run as tracked background work. Anything that
    /// stops the send is logged, never returned. The request never displaces
    /// a live code of another purpose.
    pub async fn resend_code(&self, purpose: ChallengePurpose, email: &str) -> Acknowledged {
        let email = normalize_email(email);
        let registry = Arc::clone(&self.registry);
        let otp = Arc::clone(&self.otp);
        let policy = self.config.policy(resend_flow(purpose));
        let span = info_span!("code.resend", purpose = purpose.as_str());
        self.deferred
            .spawn(
                async move { resend(registry.as_ref(), &otp, purpose, policy, &email).await }
                    .instrument(span),
            )
            .await;
        Acknowledged
    }

    pub async fn resend_registration(&self, email: &str) -> Acknowledged {
        self.resend_code(ChallengePurpose::Registration, email).await
    }

    pub async fn request_password_reset(&self, email: &str) -> Acknowledged {
        self.resend_code(ChallengePurpose::PasswordReset, email).await
    }

    /// Wait for acknowledged code requests to finish.
    pub async fn settle(&self) {
        self.deferred.settle().await;
    }

    /// Read-only cooldown projection for `purpose`. Unknown emails read as open.
    ///
    /// # Errors
    /// Only when the registry lookup fails.
    pub async fn challenge_status(
        &self,
        purpose: ChallengePurpose,
        email: &str,
    ) -> Result<GateDecision, AuthError> {
        let cooldown = self.config.policy(resend_flow(purpose)).cooldown;
        Ok(self
            .registry
            .find_by_email(&normalize_email(email))
            .await?
            .map_or_else(GateDecision::open, |principal| {
                self.otp.status(&principal, purpose, cooldown)
            }))
    }

    /// Consume a reset code and store the new password.
    ///
    /// # Errors
    /// `InvalidInput` for a short password, otherwise challenge errors.
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        require_password(new_password, self.config.min_password_length())?;
        let principal = self
            .registry
            .find_by_email(&normalize_email(email))
            .await?
            .ok_or(AuthError::NoChallenge)?;
        let password_hash = self.hash_password(new_password).await?;
        self.otp
            .verify(
                &principal,
                ChallengePurpose::PasswordReset,
                code,
                vec![PrincipalPatch::SetPasswordHash(password_hash)],
            )
            .await?;
        info!(principal_id = %principal.id, "password reset");
        Ok(())
    }

    /// Resolve a session token to the stored principal.
    ///
    /// # Errors
    /// `InvalidToken` for bad or expired tokens, deleted principals, and
    /// tokens minted for a role the principal no longer has.
    pub async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = self.tokens.verify(token)?;
        let principal = self
            .registry
            .find_by_id(claims.principal_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if principal.role != claims.role {
            debug!(principal_id = %principal.id, "token role no longer matches principal");
            return Err(AuthError::InvalidToken);
        }
        Ok(principal)
    }

    /// Change display name and mobile number. Absent fields are kept.
    ///
    /// # Errors
    /// `InvalidInput` for malformed fields, `NotFound` if the principal is gone.
    pub async fn update_profile(
        &self,
        actor: &Principal,
        display_name: Option<&str>,
        mobile_number: Option<&str>,
    ) -> Result<Principal, AuthError> {
        let display_name = display_name.map(require_name).transpose()?;
        let mobile_number = optional_mobile(mobile_number)?;
        let outcome = self
            .registry
            .update_atomic(
                actor.id,
                Precondition::Always,
                vec![PrincipalPatch::UpdateProfile {
                    display_name,
                    mobile_number,
                }],
            )
            .await?;
        match outcome {
            UpdateOutcome::Applied(principal) => Ok(principal),
            UpdateOutcome::NotFound => Err(AuthError::NotFound),
            UpdateOutcome::Stale(_) => {
                Err(anyhow!("unconditional profile update reported stale").into())
            }
        }
    }

    /// # Errors
    /// `Forbidden` unless `actor` is an admin.
    pub async fn list_users(&self, actor: &Principal) -> Result<Vec<Principal>, AuthError> {
        require_admin(actor)?;
        Ok(self.registry.list_by_role(Role::User).await?)
    }

    /// # Errors
    /// `Forbidden` unless `actor` is an admin.
    pub async fn list_admins(&self, actor: &Principal) -> Result<Vec<Principal>, AuthError> {
        require_admin(actor)?;
        Ok(self.registry.list_by_role(Role::Admin).await?)
    }

    /// Provision a verified administrator.
    ///
    /// # Errors
    /// `InvalidInput` for malformed fields, `Conflict` if taken.
    pub async fn create_admin(&self, seed: AdminSeed) -> Result<Principal, AuthError> {
        let email = require_email(&seed.email)?;
        let username = require_username(&seed.username)?;
        require_password(&seed.password, self.config.min_password_length())?;
        let display_name = require_name(&seed.display_name)?;
        let password_hash = self.hash_password(&seed.password).await?;

        match self
            .registry
            .insert(NewPrincipal {
                email,
                username,
                display_name,
                mobile_number: None,
                password_hash: Some(password_hash),
                auth_provider: AuthProvider::Local,
                role: Role::Admin,
                verified: true,
                vendor_track: false,
            })
            .await?
        {
            InsertOutcome::Created(principal) => {
                info!(principal_id = %principal.id, "admin created");
                Ok(principal)
            }
            InsertOutcome::Conflict => Err(AuthError::Conflict),
        }
    }

    /// Drop whatever challenge the principal holds, lifting its cooldown.
    ///
    /// # Errors
    /// `NotFound` for unknown emails.
    pub async fn reset_challenge(&self, email: &str) -> Result<Principal, AuthError> {
        let principal = self
            .registry
            .find_by_email(&normalize_email(email))
            .await?
            .ok_or(AuthError::NotFound)?;
        self.otp.clear(principal.id).await?;
        info!(principal_id = %principal.id, "challenge reset");
        Ok(principal)
    }

    async fn start_session(&self, principal_id: Uuid) -> Result<SessionGrant, AuthError> {
        let outcome = self
            .registry
            .update_atomic(
                principal_id,
                Precondition::Always,
                vec![PrincipalPatch::RecordLogin(self.clock.now())],
            )
            .await?;
        match outcome {
            UpdateOutcome::Applied(principal) => self.grant(principal),
            UpdateOutcome::NotFound => Err(AuthError::InvalidCredentials),
            UpdateOutcome::Stale(_) => {
                Err(anyhow!("unconditional login update reported stale").into())
            }
        }
    }

    fn grant(&self, principal: Principal) -> Result<SessionGrant, AuthError> {
        let session = self.tokens.issue(
            principal.id,
            principal.role,
            self.config.session_ttl(principal.role),
        )?;
        Ok(SessionGrant {
            token: session.token,
            expires_at: session.expires_at,
            principal,
        })
    }

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let credentials = Arc::clone(&self.credentials);
        let password = password.to_owned();
        let hash = tokio::task::spawn_blocking(move || credentials.hash(&password))
            .await
            .context("password hashing task failed")??;
        Ok(hash)
    }

    async fn verify_password(
        &self,
        password: &str,
        digest: Option<String>,
    ) -> Result<bool, AuthError> {
        let credentials = Arc::clone(&self.credentials);
        let password = password.to_owned();
        let matched =
            tokio::task::spawn_blocking(move || credentials.verify(&password, digest.as_deref()))
                .await
                .context("password verification task failed")?;
        Ok(matched)
    }
}

async fn resend(
    registry: &dyn AccountRegistry,
    otp: &OtpChallengeEngine,
    purpose: ChallengePurpose,
    policy: ChallengePolicy,
    email: &str,
) {
    let principal = match registry.find_by_email(email).await {
        Ok(Some(principal)) => principal,
        Ok(None) => {
            debug!("code requested for unknown email");
            return;
        }
        Err(err) => {
            warn!("code request lookup failed: {err:#}");
            return;
        }
    };
    if !eligible(purpose, &principal) {
        debug!(principal_id = %principal.id, "principal not eligible for code");
        return;
    }

    match otp.issue(&principal, purpose, policy, Requester::Anonymous).await {
        Ok(receipt) => {
            debug!(principal_id = %principal.id, delivered = receipt.delivered, "code re-sent");
        }
        Err(AuthError::Throttled { remaining }) => {
            debug!(
                principal_id = %principal.id,
                remaining_ms = remaining.num_milliseconds(),
                "code request throttled"
            );
        }
        Err(err) => {
            warn!(principal_id = %principal.id, "code request failed: {err}");
        }
    }
}

fn eligible(purpose: ChallengePurpose, principal: &Principal) -> bool {
    match purpose {
        ChallengePurpose::AdminLogin => principal.verified && LoginFlow::Admin.admits(principal),
        ChallengePurpose::VendorLogin => principal.verified && LoginFlow::Vendor.admits(principal),
        ChallengePurpose::Registration => !principal.verified,
        ChallengePurpose::PasswordReset => {
            principal.verified && principal.auth_provider == AuthProvider::Local
        }
    }
}

/// Storage, mail and time collaborators.
#[derive(Clone)]
pub struct Backends {
    pub registry: Arc<dyn AccountRegistry>,
    pub ledger: Arc<dyn RewardLedger>,
    pub dispatcher: Arc<dyn EmailDispatcher>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone, Debug)]
pub struct Secrets {
    pub pepper: SecretString,
    /// Base64 Ed25519 seed. Without it an ephemeral key is generated and
    /// sessions do not survive a restart.
    pub token_seed: Option<SecretString>,
}

/// Everything the HTTP layer and the CLI call into.
#[derive(Clone)]
pub struct Services {
    pub auth: Arc<AuthService>,
    pub vendors: Arc<VendorLifecycle>,
    pub rewards: Arc<RewardEngine>,
    pub registry: Arc<dyn AccountRegistry>,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// Wire the engines together.
    ///
    /// # Errors
    /// Returns an error if the hash parameters or the token seed are invalid.
    pub fn build(config: AuthConfig, backends: Backends, secrets: Secrets) -> Result<Self> {
        let Backends {
            registry,
            ledger,
            dispatcher,
            clock,
        } = backends;

        let credentials = Arc::new(
            CredentialVerifier::new(secrets.pepper.clone(), config.hash_cost())
                .context("failed to build credential verifier")?,
        );
        let tokens = Arc::new(match &secrets.token_seed {
            Some(seed) => SessionTokenIssuer::from_encoded_seed(seed, Arc::clone(&clock))
                .context("invalid session token seed")?,
            None => {
                warn!("no session token seed configured, using an ephemeral signing key");
                SessionTokenIssuer::ephemeral(Arc::clone(&clock))
            }
        });
        let otp = Arc::new(
            OtpChallengeEngine::new(
                Arc::clone(&registry),
                Arc::clone(&dispatcher),
                Arc::clone(&clock),
                secrets.pepper,
            )
            .with_dispatch_policy(config.dispatch_policy())
            .with_dispatch_timeout(config.dispatch_timeout())
            .with_attempt_limit(config.verify_attempt_limit(), config.verify_lockout()),
        );
        let vendors = Arc::new(VendorLifecycle::new(
            Arc::clone(&registry),
            dispatcher,
            Arc::clone(&clock),
            config.frontend_base_url().to_string(),
        ));
        let rewards = Arc::new(
            RewardEngine::new(ledger, Arc::clone(&clock)).with_cooldown(config.reward_cooldown()),
        );
        let auth = Arc::new(AuthService::new(
            config,
            Arc::clone(&registry),
            credentials,
            otp,
            tokens,
            Arc::clone(&clock),
        ));

        Ok(Self {
            auth,
            vendors,
            rewards,
            registry,
            clock,
        })
    }
}
