//! Cooldown rule shared by challenge resends and reward claims.
//!
//! [`check`] is pure: it never persists anything. Callers store the new
//! "last issued" timestamp only when they actually act, and they do so with a
//! conditional update so two requests cannot both pass the same window.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Result of a gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    #[serde(rename = "remaining_ms", serialize_with = "serialize_millis")]
    pub remaining: Duration,
}

impl GateDecision {
    #[must_use]
    pub fn open() -> Self {
        Self {
            allowed: true,
            remaining: Duration::zero(),
        }
    }

    /// Remaining time in whole milliseconds, never negative.
    #[must_use]
    pub fn remaining_ms(&self) -> i64 {
        self.remaining.num_milliseconds().max(0)
    }
}

/// Decide whether an action may run again.
///
/// A timestamp in the future counts as zero elapsed time, so the full window
/// still applies. A zero or negative window always allows.
#[must_use]
pub fn check(
    last_issued_at: Option<DateTime<Utc>>,
    window: Duration,
    now: DateTime<Utc>,
) -> GateDecision {
    let Some(last) = last_issued_at else {
        return GateDecision::open();
    };
    if window <= Duration::zero() {
        return GateDecision::open();
    }

    let elapsed = (now - last).max(Duration::zero());
    if elapsed >= window {
        GateDecision::open()
    } else {
        GateDecision {
            allowed: false,
            remaining: window - elapsed,
        }
    }
}

fn serialize_millis<S: serde::Serializer>(
    value: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(value.num_milliseconds().max(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn absent_timestamp_allows() {
        let decision = check(None, Duration::minutes(1), t0());
        assert!(decision.allowed);
        assert_eq!(decision.remaining_ms(), 0);
    }

    #[test]
    fn remaining_decreases_and_reaches_zero_at_window() {
        let window = Duration::minutes(1);
        let mut previous = i64::MAX;
        for seconds in [0, 1, 15, 30, 59] {
            let decision = check(Some(t0()), window, t0() + Duration::seconds(seconds));
            assert!(!decision.allowed);
            assert!(decision.remaining_ms() < previous);
            previous = decision.remaining_ms();
        }

        let at_window = check(Some(t0()), window, t0() + window);
        assert!(at_window.allowed);
        assert_eq!(at_window.remaining_ms(), 0);

        let one_ms_before = check(Some(t0()), window, t0() + window - Duration::milliseconds(1));
        assert!(!one_ms_before.allowed);
        assert_eq!(one_ms_before.remaining_ms(), 1);
    }

    #[test]
    fn future_timestamp_keeps_full_window() {
        let window = Duration::minutes(30);
        let decision = check(Some(t0() + Duration::minutes(5)), window, t0());
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, window);
    }

    #[test]
    fn zero_window_always_allows() {
        let decision = check(Some(t0()), Duration::zero(), t0());
        assert!(decision.allowed);
    }

    #[test]
    fn serializes_remaining_as_millis() {
        let decision = check(Some(t0()), Duration::seconds(2), t0());
        let json = serde_json::to_value(decision).unwrap();
        assert_eq!(json["allowed"], false);
        assert_eq!(json["remaining_ms"], 2000);
    }
}
