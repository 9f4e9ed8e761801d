//! # Reconnect Supervision State
//!
//! Backoff schedule and progress tracking for automatic reconnection.
//!
//! The reconnect loop itself lives with the link; this module holds the
//! pieces that are pure enough to test in isolation: the exponential
//! delay schedule and the snapshot the embedder sees while the
//! supervisor works.

use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

/// Growth factor between consecutive reconnect delays
const BACKOFF_FACTOR: f64 = 1.5;

/// Exponent cap keeping the uncapped delay finite for absurd attempt counts
const MAX_BACKOFF_EXPONENT: u32 = 60;

/// Progress of the reconnect supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconnectSnapshot {
    /// Whether a reconnect loop is currently running
    pub reconnecting: bool,
    /// Attempts made in the current episode (0 when idle)
    pub attempt: u32,
    /// Configured attempt limit, `None` when unlimited
    pub max_attempts: Option<u32>,
    /// Epoch milliseconds of the next scheduled attempt, while waiting
    pub next_retry_ms: Option<i64>,
    /// Most recent failure message, carried until the next success
    pub last_error: Option<String>,
}

/// Delay before reconnect attempt number `attempt` (1-based).
///
/// Grows by a factor of 1.5 per attempt starting from `base_delay_s`,
/// capped at `max_delay_s`.
///
/// # Examples
///
/// ```
/// use rotor_bridge::link::reconnect_delay;
/// use std::time::Duration;
///
/// assert_eq!(reconnect_delay(1, 2.0, 30.0), Duration::from_secs_f64(2.0));
/// assert_eq!(reconnect_delay(2, 2.0, 30.0), Duration::from_secs_f64(3.0));
/// assert_eq!(reconnect_delay(20, 2.0, 30.0), Duration::from_secs_f64(30.0));
/// ```
#[must_use]
pub fn reconnect_delay(attempt: u32, base_delay_s: f64, max_delay_s: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    let delay_s = (base_delay_s * BACKOFF_FACTOR.powi(exponent as i32)).min(max_delay_s);
    Duration::from_secs_f64(delay_s.max(0.0))
}

/// Reconnect progress shared between the supervisor loop and the API
pub struct ReconnectTracker {
    max_attempts: u32,
    state: Mutex<ReconnectSnapshot>,
}

impl ReconnectTracker {
    /// Create an idle tracker; `max_attempts` of 0 means unlimited
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            state: Mutex::new(ReconnectSnapshot {
                reconnecting: false,
                attempt: 0,
                max_attempts: (max_attempts > 0).then_some(max_attempts),
                next_retry_ms: None,
                last_error: None,
            }),
        }
    }

    /// Configured attempt limit, 0 meaning unlimited
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Current snapshot
    pub fn snapshot(&self) -> ReconnectSnapshot {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(_) => ReconnectSnapshot {
                reconnecting: false,
                attempt: 0,
                max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
                next_retry_ms: None,
                last_error: None,
            },
        }
    }

    /// Most recent failure message, if any
    pub fn last_error(&self) -> Option<String> {
        match self.state.lock() {
            Ok(state) => state.last_error.clone(),
            Err(_) => None,
        }
    }

    /// Replace the tracked progress and return the snapshot to broadcast
    pub fn update(
        &self,
        reconnecting: bool,
        attempt: u32,
        next_retry_ms: Option<i64>,
        last_error: Option<String>,
    ) -> ReconnectSnapshot {
        let snapshot = ReconnectSnapshot {
            reconnecting,
            attempt,
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            next_retry_ms,
            last_error,
        };
        if let Ok(mut state) = self.state.lock() {
            *state = snapshot.clone();
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_uses_base_delay() {
        assert_eq!(reconnect_delay(1, 1.0, 30.0), Duration::from_secs_f64(1.0));
        assert_eq!(reconnect_delay(1, 2.5, 30.0), Duration::from_secs_f64(2.5));
    }

    #[test]
    fn test_delay_grows_by_half_each_attempt() {
        assert_eq!(reconnect_delay(2, 2.0, 60.0), Duration::from_secs_f64(3.0));
        assert_eq!(reconnect_delay(3, 2.0, 60.0), Duration::from_secs_f64(4.5));
        assert_eq!(reconnect_delay(4, 2.0, 60.0), Duration::from_secs_f64(6.75));
    }

    #[test]
    fn test_delay_caps_at_maximum() {
        assert_eq!(reconnect_delay(10, 2.0, 10.0), Duration::from_secs_f64(10.0));
        assert_eq!(
            reconnect_delay(1000, 2.0, 30.0),
            Duration::from_secs_f64(30.0)
        );
    }

    #[test]
    fn test_huge_attempt_count_does_not_overflow() {
        let delay = reconnect_delay(u32::MAX, 1.0, 30.0);
        assert_eq!(delay, Duration::from_secs_f64(30.0));
    }

    #[test]
    fn test_attempt_zero_behaves_like_first() {
        assert_eq!(reconnect_delay(0, 2.0, 30.0), Duration::from_secs_f64(2.0));
    }

    #[test]
    fn test_new_tracker_is_idle() {
        let tracker = ReconnectTracker::new(5);
        let snapshot = tracker.snapshot();
        assert!(!snapshot.reconnecting);
        assert_eq!(snapshot.attempt, 0);
        assert_eq!(snapshot.max_attempts, Some(5));
        assert!(snapshot.next_retry_ms.is_none());
        assert!(snapshot.last_error.is_none());
    }

    #[test]
    fn test_zero_max_attempts_reports_unlimited() {
        let tracker = ReconnectTracker::new(0);
        assert_eq!(tracker.snapshot().max_attempts, None);
        assert_eq!(tracker.max_attempts(), 0);
    }

    #[test]
    fn test_update_replaces_snapshot() {
        let tracker = ReconnectTracker::new(5);
        tracker.update(true, 2, Some(12_000), Some("port busy".to_string()));

        let snapshot = tracker.snapshot();
        assert!(snapshot.reconnecting);
        assert_eq!(snapshot.attempt, 2);
        assert_eq!(snapshot.next_retry_ms, Some(12_000));
        assert_eq!(snapshot.last_error.as_deref(), Some("port busy"));
        assert_eq!(tracker.last_error().as_deref(), Some("port busy"));
    }

    #[test]
    fn test_update_returns_broadcastable_snapshot() {
        let tracker = ReconnectTracker::new(0);
        let snapshot = tracker.update(false, 0, None, None);
        assert_eq!(snapshot, tracker.snapshot());
    }
}
