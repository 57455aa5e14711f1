//! Sliding-window rate limiter.
//!
//! Protects specialist agents from bursty callers. Admission is decided
//! against the events recorded in the immediately preceding window duration
//! (a continuous window, not fixed clock buckets), keyed by an arbitrary
//! identity token — typically the target agent's name.
//!
//! Window math uses the monotonic clock ([`tokio::time::Instant`]) so that
//! NTP adjustments and leap seconds cannot release bursts.
//!
//! # Example
//!
//! ```rust
//! use agentgate::rate_limiter::RateLimiter;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let limiter = RateLimiter::new(2, Duration::from_secs(60));
//! assert!(limiter.try_acquire("gmail").await);
//! assert!(limiter.try_acquire("gmail").await);
//! assert!(!limiter.try_acquire("gmail").await); // budget spent
//! assert!(limiter.try_acquire("weather").await); // keys are independent
//! # });
//! ```

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Admission budget for one key: at most `max_events` within `window`.
#[derive(Debug, Clone, Copy)]
struct Budget {
    max_events: usize,
    window: Duration,
}

/// Sliding-window rate limiter keyed by caller identity.
///
/// Each key keeps a timestamped ring of its most recent admitted events.
/// On every call, events older than `now - window` are dropped; the call is
/// admitted only if the remaining count is below the key's budget. Denied
/// calls record nothing, so refusals never consume budget.
///
/// `try_acquire` never fails — returning `false` is the only refusal mode —
/// and operations on the same key appear atomic under concurrency.
pub struct RateLimiter {
    default_budget: Budget,
    overrides: HashMap<String, Budget>,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter admitting at most `max_events` per `window` for
    /// every key that has no explicit override.
    pub fn new(max_events: usize, window: Duration) -> Self {
        RateLimiter {
            default_budget: Budget { max_events, window },
            overrides: HashMap::new(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a per-key budget override (builder pattern).
    ///
    /// # Example
    ///
    /// ```rust
    /// use agentgate::rate_limiter::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(60, Duration::from_secs(60))
    ///     .with_budget("gmail", 2, Duration::from_secs(60));
    /// ```
    pub fn with_budget(mut self, key: impl Into<String>, max_events: usize, window: Duration) -> Self {
        self.overrides.insert(key.into(), Budget { max_events, window });
        self
    }

    fn budget_for(&self, key: &str) -> Budget {
        self.overrides
            .get(key)
            .copied()
            .unwrap_or(self.default_budget)
    }

    /// The window length applied to `key` — the worst-case wait before a
    /// denied caller can expect budget to free up.
    pub fn window(&self, key: &str) -> Duration {
        self.budget_for(key).window
    }

    /// Record an event for `key` if its budget allows it.
    ///
    /// Returns `true` iff the caller is permitted; the event is recorded only
    /// in that case. An event whose timestamp sits exactly on the window
    /// cutoff is treated as outside the window and evicted.
    pub async fn try_acquire(&self, key: &str) -> bool {
        let budget = self.budget_for(key);
        let now = Instant::now();

        let mut windows = self.windows.lock().await;
        let ring = windows.entry(key.to_string()).or_insert_with(VecDeque::new);

        if let Some(cutoff) = now.checked_sub(budget.window) {
            while let Some(front) = ring.front() {
                if *front <= cutoff {
                    ring.pop_front();
                } else {
                    break;
                }
            }
        }

        if ring.len() < budget.max_events {
            ring.push_back(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, pause};

    #[tokio::test]
    async fn test_budget_exhaustion_and_recovery() {
        pause();
        let limiter = RateLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.try_acquire("k").await);
        assert!(limiter.try_acquire("k").await);
        assert!(!limiter.try_acquire("k").await);

        // Sliding past the window frees the oldest slot.
        advance(Duration::from_secs(61)).await;
        assert!(limiter.try_acquire("k").await);
    }

    #[tokio::test]
    async fn test_denied_calls_do_not_consume_budget() {
        pause();
        let limiter = RateLimiter::new(1, Duration::from_secs(10));

        assert!(limiter.try_acquire("k").await);
        for _ in 0..5 {
            assert!(!limiter.try_acquire("k").await);
        }

        // Only the single admitted event occupies the window; once it ages
        // out the key is admitted again despite the refused attempts.
        advance(Duration::from_secs(11)).await;
        assert!(limiter.try_acquire("k").await);
    }

    #[tokio::test]
    async fn test_event_on_cutoff_is_evicted() {
        pause();
        let limiter = RateLimiter::new(1, Duration::from_secs(10));

        assert!(limiter.try_acquire("k").await);
        advance(Duration::from_secs(10)).await;
        // The recorded event now sits exactly on the cutoff: outside.
        assert!(limiter.try_acquire("k").await);
    }

    #[tokio::test]
    async fn test_per_key_override() {
        pause();
        let limiter =
            RateLimiter::new(100, Duration::from_secs(60)).with_budget("tight", 1, Duration::from_secs(60));

        assert!(limiter.try_acquire("tight").await);
        assert!(!limiter.try_acquire("tight").await);
        assert!(limiter.try_acquire("loose").await);
        assert_eq!(limiter.window("tight"), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_zero_budget_always_denies() {
        pause();
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        assert!(!limiter.try_acquire("k").await);
    }
}
