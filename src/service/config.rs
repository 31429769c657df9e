//! Flow configuration: cooldowns, code lifetimes and session lifetimes.

use crate::{
    credential::HashCost,
    limit::WindowLimit,
    model::Role,
    otp::{
        ChallengePolicy, DispatchPolicy, DEFAULT_VERIFY_ATTEMPT_LIMIT,
        DEFAULT_VERIFY_LOCKOUT_SECONDS,
    },
};
use chrono::Duration;

pub const DEFAULT_ADMIN_LOGIN_COOLDOWN_SECONDS: i64 = 30 * 60;
pub const DEFAULT_ADMIN_LOGIN_TTL_SECONDS: i64 = 5 * 60;
pub const DEFAULT_ADMIN_RESEND_COOLDOWN_SECONDS: i64 = 60;
pub const DEFAULT_ADMIN_RESEND_TTL_SECONDS: i64 = 60;
pub const DEFAULT_VENDOR_COOLDOWN_SECONDS: i64 = 60;
pub const DEFAULT_VENDOR_TTL_SECONDS: i64 = 5 * 60;
pub const DEFAULT_REGISTRATION_COOLDOWN_SECONDS: i64 = 60;
pub const DEFAULT_REGISTRATION_TTL_SECONDS: i64 = 60 * 60;
pub const DEFAULT_RESET_COOLDOWN_SECONDS: i64 = 60;
pub const DEFAULT_RESET_TTL_SECONDS: i64 = 60 * 60;
pub const DEFAULT_ADMIN_SESSION_TTL_SECONDS: i64 = 15 * 60;
pub const DEFAULT_VENDOR_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
pub const DEFAULT_USER_SESSION_TTL_SECONDS: i64 = 15 * 24 * 60 * 60;
pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 6;
pub const DEFAULT_DISPATCH_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_REWARD_COOLDOWN_SECONDS: i64 = 24 * 60 * 60;
pub const DEFAULT_REQUEST_LIMIT: u32 = 100;
pub const DEFAULT_REQUEST_WINDOW_SECONDS: i64 = 15 * 60;
pub const DEFAULT_REWARD_REQUEST_LIMIT: u32 = 20;
pub const DEFAULT_REWARD_REQUEST_WINDOW_SECONDS: i64 = 60;

/// Challenge-issuing call sites, each with its own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeFlow {
    AdminLogin,
    AdminResend,
    VendorLogin,
    VendorResend,
    Registration,
    PasswordReset,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    admin_login: ChallengePolicy,
    admin_resend: ChallengePolicy,
    vendor_login: ChallengePolicy,
    vendor_resend: ChallengePolicy,
    registration: ChallengePolicy,
    password_reset: ChallengePolicy,
    admin_session_ttl_seconds: i64,
    vendor_session_ttl_seconds: i64,
    user_session_ttl_seconds: i64,
    min_password_length: usize,
    dispatch_policy: DispatchPolicy,
    dispatch_timeout_seconds: u64,
    reward_cooldown_seconds: i64,
    verify_attempt_limit: u32,
    verify_lockout_seconds: i64,
    request_limit: WindowLimit,
    reward_request_limit: WindowLimit,
    hash_cost: HashCost,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url: frontend_base_url.trim_end_matches('/').to_string(),
            admin_login: ChallengePolicy::from_seconds(
                DEFAULT_ADMIN_LOGIN_COOLDOWN_SECONDS,
                DEFAULT_ADMIN_LOGIN_TTL_SECONDS,
            ),
            admin_resend: ChallengePolicy::from_seconds(
                DEFAULT_ADMIN_RESEND_COOLDOWN_SECONDS,
                DEFAULT_ADMIN_RESEND_TTL_SECONDS,
            ),
            vendor_login: ChallengePolicy::from_seconds(
                DEFAULT_VENDOR_COOLDOWN_SECONDS,
                DEFAULT_VENDOR_TTL_SECONDS,
            ),
            vendor_resend: ChallengePolicy::from_seconds(
                DEFAULT_VENDOR_COOLDOWN_SECONDS,
                DEFAULT_VENDOR_TTL_SECONDS,
            ),
            registration: ChallengePolicy::from_seconds(
                DEFAULT_REGISTRATION_COOLDOWN_SECONDS,
                DEFAULT_REGISTRATION_TTL_SECONDS,
            ),
            password_reset: ChallengePolicy::from_seconds(
                DEFAULT_RESET_COOLDOWN_SECONDS,
                DEFAULT_RESET_TTL_SECONDS,
            ),
            admin_session_ttl_seconds: DEFAULT_ADMIN_SESSION_TTL_SECONDS,
            vendor_session_ttl_seconds: DEFAULT_VENDOR_SESSION_TTL_SECONDS,
            user_session_ttl_seconds: DEFAULT_USER_SESSION_TTL_SECONDS,
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            dispatch_policy: DispatchPolicy::Strict,
            dispatch_timeout_seconds: DEFAULT_DISPATCH_TIMEOUT_SECONDS,
            reward_cooldown_seconds: DEFAULT_REWARD_COOLDOWN_SECONDS,
            verify_attempt_limit: DEFAULT_VERIFY_ATTEMPT_LIMIT,
            verify_lockout_seconds: DEFAULT_VERIFY_LOCKOUT_SECONDS,
            request_limit: WindowLimit::from_seconds(
                DEFAULT_REQUEST_LIMIT,
                DEFAULT_REQUEST_WINDOW_SECONDS,
            ),
            reward_request_limit: WindowLimit::from_seconds(
                DEFAULT_REWARD_REQUEST_LIMIT,
                DEFAULT_REWARD_REQUEST_WINDOW_SECONDS,
            ),
            hash_cost: HashCost::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, flow: ChallengeFlow, policy: ChallengePolicy) -> Self {
        match flow {
            ChallengeFlow::AdminLogin => self.admin_login = policy,
            ChallengeFlow::AdminResend => self.admin_resend = policy,
            ChallengeFlow::VendorLogin => self.vendor_login = policy,
            ChallengeFlow::VendorResend => self.vendor_resend = policy,
            ChallengeFlow::Registration => self.registration = policy,
            ChallengeFlow::PasswordReset => self.password_reset = policy,
        }
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, role: Role, seconds: i64) -> Self {
        match role {
            Role::Admin => self.admin_session_ttl_seconds = seconds,
            Role::Vendor => self.vendor_session_ttl_seconds = seconds,
            Role::User => self.user_session_ttl_seconds = seconds,
        }
        self
    }

    #[must_use]
    pub fn with_min_password_length(mut self, length: usize) -> Self {
        self.min_password_length = length.max(1);
        self
    }

    #[must_use]
    pub fn with_dispatch_policy(mut self, policy: DispatchPolicy) -> Self {
        self.dispatch_policy = policy;
        self
    }

    #[must_use]
    pub fn with_dispatch_timeout_seconds(mut self, seconds: u64) -> Self {
        self.dispatch_timeout_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_reward_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.reward_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verify_attempts(mut self, limit: u32, lockout_seconds: i64) -> Self {
        self.verify_attempt_limit = limit.max(1);
        self.verify_lockout_seconds = lockout_seconds;
        self
    }

    /// Requests per client IP across the whole API.
    #[must_use]
    pub fn with_request_limit(mut self, limit: WindowLimit) -> Self {
        self.request_limit = limit;
        self
    }

    /// Requests per client IP on reward routes, on top of the API-wide limit.
    #[must_use]
    pub fn with_reward_request_limit(mut self, limit: WindowLimit) -> Self {
        self.reward_request_limit = limit;
        self
    }

    #[must_use]
    pub fn with_hash_cost(mut self, cost: HashCost) -> Self {
        self.hash_cost = cost;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }

    #[must_use]
    pub const fn policy(&self, flow: ChallengeFlow) -> ChallengePolicy {
        match flow {
            ChallengeFlow::AdminLogin => self.admin_login,
            ChallengeFlow::AdminResend => self.admin_resend,
            ChallengeFlow::VendorLogin => self.vendor_login,
            ChallengeFlow::VendorResend => self.vendor_resend,
            ChallengeFlow::Registration => self.registration,
            ChallengeFlow::PasswordReset => self.password_reset,
        }
    }

    #[must_use]
    pub const fn session_ttl_seconds(&self, role: Role) -> i64 {
        match role {
            Role::Admin => self.admin_session_ttl_seconds,
            Role::Vendor => self.vendor_session_ttl_seconds,
            Role::User => self.user_session_ttl_seconds,
        }
    }

    #[must_use]
    pub fn session_ttl(&self, role: Role) -> Duration {
        Duration::seconds(self.session_ttl_seconds(role))
    }

    #[must_use]
    pub const fn min_password_length(&self) -> usize {
        self.min_password_length
    }

    #[must_use]
    pub const fn dispatch_policy(&self) -> DispatchPolicy {
        self.dispatch_policy
    }

    #[must_use]
    pub const fn dispatch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.dispatch_timeout_seconds)
    }

    #[must_use]
    pub fn reward_cooldown(&self) -> Duration {
        Duration::seconds(self.reward_cooldown_seconds)
    }

    #[must_use]
    pub const fn verify_attempt_limit(&self) -> u32 {
        self.verify_attempt_limit
    }

    #[must_use]
    pub fn verify_lockout(&self) -> Duration {
        Duration::seconds(self.verify_lockout_seconds)
    }

    #[must_use]
    pub const fn request_limit(&self) -> WindowLimit {
        self.request_limit
    }

    #[must_use]
    pub const fn reward_request_limit(&self) -> WindowLimit {
        self.reward_request_limit
    }

    #[must_use]
    pub const fn hash_cost(&self) -> HashCost {
        self.hash_cost
    }
}
