use crate::model::VendorStatus;
use chrono::Duration;
use std::fmt;

/// Vendor state machine action, reported by [`AuthError::InvalidTransition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorAction {
    Submit,
    Approve,
    Reject,
}

impl fmt::Display for VendorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
        })
    }
}

/// Typed failures surfaced by the core.
///
/// Infrastructure failures (store, hashing, serialization) collapse into
/// [`AuthError::Internal`], whose message never carries the underlying detail.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("cooldown active, retry in {}ms", .remaining.num_milliseconds().max(0))]
    Throttled { remaining: Duration },

    #[error("too many attempts, retry in {}ms", .remaining.num_milliseconds().max(0))]
    TooManyAttempts { remaining: Duration },

    #[error("no active challenge, request a new code")]
    NoChallenge,

    #[error("challenge expired, request a new code")]
    Expired,

    #[error("invalid code")]
    Mismatch,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account is pending verification")]
    Unverified,

    #[error("cannot {action} a vendor application in status {from}")]
    InvalidTransition {
        from: VendorStatus,
        action: VendorAction,
    },

    #[error("failed to deliver notification")]
    NotificationDispatch(#[source] anyhow::Error),

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("insufficient permissions")]
    Forbidden,

    #[error("account not found")]
    NotFound,

    #[error("account already exists")]
    Conflict,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Milliseconds left for a throttled call, if any.
    #[must_use]
    pub fn remaining_ms(&self) -> Option<i64> {
        match self {
            Self::Throttled { remaining } | Self::TooManyAttempts { remaining } => {
                Some(remaining.num_milliseconds().max(0))
            }
            _ => None,
        }
    }
}
