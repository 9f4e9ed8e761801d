//! # Link Health Tracking
//!
//! Tracks whether the rotor controller is actually talking to us and
//! decides when that is worth telling the embedder about.
//!
//! The link refreshes health on every received status line and marks it
//! unhealthy on teardown or staleness. Raw updates arrive far more often
//! than anyone wants to hear about them, so the monitor broadcasts only
//! when the healthy flag flips, plus a throttled refresh at most once a
//! second while data is flowing (keeps the last-seen timestamp moving for
//! UI consumers without flooding the channel).

use chrono::Utc;
use serde::Serialize;
use std::sync::Mutex;

/// Minimum gap between refresh broadcasts while the healthy flag is stable
const REFRESH_THROTTLE_MS: i64 = 1000;

/// Point-in-time view of link health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    /// Whether the controller is considered responsive
    pub healthy: bool,
    /// Epoch milliseconds of the last received data, if any
    pub last_seen_ms: Option<i64>,
}

impl HealthSnapshot {
    fn offline() -> Self {
        Self {
            healthy: false,
            last_seen_ms: None,
        }
    }
}

/// Health state with broadcast throttling
pub struct HealthMonitor {
    state: Mutex<HealthState>,
}

struct HealthState {
    snapshot: HealthSnapshot,
    last_broadcast_ms: i64,
}

impl HealthMonitor {
    /// Create a monitor reporting unhealthy with no data seen
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HealthState {
                snapshot: HealthSnapshot::offline(),
                last_broadcast_ms: 0,
            }),
        }
    }

    /// Current health snapshot
    pub fn snapshot(&self) -> HealthSnapshot {
        match self.state.lock() {
            Ok(state) => state.snapshot,
            Err(_) => HealthSnapshot::offline(),
        }
    }

    /// Record a health update.
    ///
    /// # Returns
    ///
    /// The new snapshot when it should be broadcast to subscribers:
    /// on every flip of `healthy`, and at most once per second otherwise
    /// while data is arriving.
    pub fn update(&self, healthy: bool, last_seen_ms: Option<i64>) -> Option<HealthSnapshot> {
        self.update_at(healthy, last_seen_ms, Utc::now().timestamp_millis())
    }

    fn update_at(
        &self,
        healthy: bool,
        last_seen_ms: Option<i64>,
        now_ms: i64,
    ) -> Option<HealthSnapshot> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };

        let flipped = state.snapshot.healthy != healthy;
        state.snapshot = HealthSnapshot {
            healthy,
            last_seen_ms,
        };

        let refresh_due =
            last_seen_ms.is_some() && now_ms - state.last_broadcast_ms >= REFRESH_THROTTLE_MS;
        if flipped || refresh_due {
            state.last_broadcast_ms = now_ms;
            Some(state.snapshot)
        } else {
            None
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
