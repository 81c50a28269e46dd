//! Observable playback state and rate-limit configuration

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Snapshot of the coordinator's state, as seen by observers
///
/// `active_request_id` is set exactly when `is_playing` is true, and an id
/// in `pending_queue` is never the active one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub active_request_id: Option<String>,
    /// Advisory queue of rejected ids, oldest first, without duplicates
    pub pending_queue: Vec<String>,
    pub last_playback_start: Option<Instant>,
    /// Incremented on every mutation; later snapshots have larger revisions
    pub revision: u64,
}

impl PlaybackState {
    #[must_use]
    pub fn is_active(&self, id: &str) -> bool {
        self.active_request_id.as_deref() == Some(id)
    }

    #[must_use]
    pub fn queue_position(&self, id: &str) -> Option<usize> {
        self.pending_queue.iter().position(|queued| queued == id)
    }
}

/// Throttling of playback starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Minimum time between two playback starts
    pub min_interval_ms: u64,
    /// Most ids the advisory queue will hold
    pub max_queue_depth: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_ms: 500,
            max_queue_depth: 3,
        }
    }
}

impl RateLimitConfig {
    /// No throttling; only duplicate in-flight ids are refused
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            min_interval_ms: 0,
            max_queue_depth: 0,
        }
    }

    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}
