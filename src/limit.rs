//! In-process request and attempt limits.
//!
//! Flow Overview:
//! 1) [`RequestLimiter`] counts requests per key (the client IP) in fixed
//!    windows and refuses the rest of a window once `max` is reached.
//! 2) [`AttemptGuard`] counts consecutive wrong codes per principal. Reaching
//!    the limit locks code verification for the lockout period; a correct code
//!    resets the count.
//!
//! Both live in process memory, so every instance enforces its own limits.

use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use uuid::Uuid;

/// Entries kept before expired ones are swept.
const SWEEP_THRESHOLD: usize = 10_000;

/// `max` events per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    pub max: u32,
    pub window: Duration,
}

impl WindowLimit {
    #[must_use]
    pub fn from_seconds(max: u32, window_seconds: i64) -> Self {
        Self {
            max,
            window: Duration::seconds(window_seconds),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

/// Fixed-window request counter.
pub struct RequestLimiter {
    limit: WindowLimit,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, Window>>,
}

impl RequestLimiter {
    #[must_use]
    pub fn new(limit: WindowLimit, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn limit(&self) -> WindowLimit {
        self.limit
    }

    /// Count one request for `key`.
    ///
    /// # Errors
    /// Returns the time left in the window once `max` requests were seen.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut windows = lock(&self.windows);
        if windows.len() >= SWEEP_THRESHOLD {
            let window = self.limit.window;
            windows.retain(|_, entry| now - entry.started_at < window);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });
        if now - entry.started_at >= self.limit.window {
            *entry = Window {
                started_at: now,
                count: 0,
            };
        }
        if entry.count >= self.limit.max {
            return Err(entry.started_at + self.limit.window - now);
        }
        entry.count += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Failures {
    count: u32,
    last_at: DateTime<Utc>,
}

/// Consecutive wrong-code counter with a lockout.
pub struct AttemptGuard {
    limit: u32,
    lockout: Duration,
    failures: Mutex<HashMap<Uuid, Failures>>,
}

impl AttemptGuard {
    #[must_use]
    pub fn new(limit: u32, lockout: Duration) -> Self {
        Self {
            limit: limit.max(1),
            lockout,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// # Errors
    /// Returns the lockout left when the principal used up its attempts.
    pub fn check(&self, principal_id: Uuid, now: DateTime<Utc>) -> Result<(), Duration> {
        let mut failures = lock(&self.failures);
        let Some(entry) = failures.get(&principal_id).copied() else {
            return Ok(());
        };
        if entry.count < self.limit {
            return Ok(());
        }
        let elapsed = now - entry.last_at;
        if elapsed >= self.lockout {
            failures.remove(&principal_id);
            return Ok(());
        }
        Err(self.lockout - elapsed)
    }

    /// Record a wrong code and return the consecutive count.
    pub fn record_failure(&self, principal_id: Uuid, now: DateTime<Utc>) -> u32 {
        let mut failures = lock(&self.failures);
        if failures.len() >= SWEEP_THRESHOLD {
            let lockout = self.lockout;
            failures.retain(|_, entry| now - entry.last_at < lockout);
        }
        let entry = failures.entry(principal_id).or_insert(Failures {
            count: 0,
            last_at: now,
        });
        entry.count += 1;
        entry.last_at = now;
        entry.count
    }

    pub fn reset(&self, principal_id: Uuid) {
        lock(&self.failures).remove(&principal_id);
    }
}

fn lock<K: Eq + Hash, V>(map: &Mutex<HashMap<K, V>>) -> MutexGuard<'_, HashMap<K, V>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}
