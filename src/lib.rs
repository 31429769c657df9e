//! # Turnstile (identity, challenge gating and vendor onboarding)
//!
//! `turnstile` authenticates three kinds of principals (users, vendors and
//! admins) against one account store. Sensitive logins are gated behind
//! emailed one-time codes with per-flow cooldowns, and vendor applications move
//! through an admin approval workflow.
//!
//! ## Building blocks
//!
//! - [`gate`]: the cooldown rule shared by code resends and reward claims.
//! - [`otp`]: issues, stores (hashed) and consumes numeric challenges.
//! - [`token`]: PASETO `v4.public` session tokens scoped to a role.
//! - [`vendor`]: the `NEW -> PENDING -> APPROVED | REJECTED` state machine.
//! - [`rewards`]: weighted point draws and threshold prizes.
//! - [`service`]: the login, registration and recovery flows on top of them.
//! - [`limit`]: per-IP request windows and the wrong-code lockout.
//!
//! Storage sits behind [`registry::AccountRegistry`] and
//! [`rewards::RewardLedger`]; email delivery behind [`email::EmailDispatcher`].
//! Both have in-memory implementations for tests and local development.
//!
//! ## Enumeration safety
//!
//! Resend and password-reset calls return the same acknowledgement whether or
//! not the account exists, and return it before the account is looked up.
//! Login failures for unknown accounts, wrong passwords and wrong roles are
//! all reported as invalid credentials.

pub mod api;
pub mod cli;
pub mod clock;
pub mod credential;
pub mod email;
pub mod error;
pub mod gate;
pub mod limit;
pub mod model;
pub mod otp;
pub mod registry;
pub mod rewards;
pub mod service;
pub mod token;
pub mod vendor;

pub use error::AuthError;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_user_agent() {
        assert!(APP_USER_AGENT.starts_with("turnstile/"));
    }
}
