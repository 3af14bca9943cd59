use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::now_epoch_ms;

/// Admission outcome for one request attempt. A rejection is a policy
/// decision, not an error; the caller surfaces `retry_after_seconds` to the
/// end user instead of retrying silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub retry_after_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub used: usize,
    pub remaining: usize,
    pub reset_in_seconds: u64,
}

/// Per-user sliding-window rate limiter. The window is a strict trailing
/// interval: an attempt exactly `window_seconds` old is already expired.
/// Advisory throttling only; all state is in-memory and lost on restart, so
/// this must not be treated as a security boundary.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window_ms: i64,
    inner: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_seconds: u64) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window_ms: (window_seconds.max(1) * 1_000) as i64,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window_seconds(&self) -> u64 {
        (self.window_ms / 1_000) as u64
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, VecDeque<i64>>> {
        // The map stays consistent even if another caller panicked mid-hold.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn prune(window: &mut VecDeque<i64>, cutoff_ms: i64) {
        while window.front().is_some_and(|ts| *ts <= cutoff_ms) {
            window.pop_front();
        }
    }

    pub fn check_and_record(&self, user_key: &str) -> Decision {
        self.check_and_record_at(user_key, now_epoch_ms())
    }

    pub fn check_and_record_at(&self, user_key: &str, now_ms: i64) -> Decision {
        debug_assert!(!user_key.is_empty(), "user key must be non-empty");
        let mut map = self.guard();
        let window = map.entry(user_key.to_string()).or_default();
        Self::prune(window, now_ms - self.window_ms);

        if window.len() >= self.max_requests {
            // Oldest retained attempt leaves the window first; round the wait
            // up so a caller never retries a moment too early.
            let oldest_ms = *window.front().unwrap_or(&now_ms);
            let wait_ms = (oldest_ms + self.window_ms - now_ms).max(0);
            debug!(user = user_key, wait_ms, "request rejected by rate limit");
            return Decision {
                allowed: false,
                retry_after_seconds: (wait_ms as u64).div_ceil(1_000),
            };
        }

        window.push_back(now_ms);
        Decision {
            allowed: true,
            retry_after_seconds: 0,
        }
    }

    /// Same pruning as `check_and_record`, but never records an attempt.
    pub fn stats(&self, user_key: &str) -> Usage {
        self.stats_at(user_key, now_epoch_ms())
    }

    pub fn stats_at(&self, user_key: &str, now_ms: i64) -> Usage {
        let mut map = self.guard();
        let window = map.entry(user_key.to_string()).or_default();
        Self::prune(window, now_ms - self.window_ms);

        let used = window.len();
        let reset_in_seconds = window
            .front()
            .map(|oldest_ms| ((oldest_ms + self.window_ms - now_ms).max(0) as u64).div_ceil(1_000))
            .unwrap_or(0);
        Usage {
            used,
            remaining: self.max_requests.saturating_sub(used),
            reset_in_seconds,
        }
    }

    /// Operator override: forget the user's window entirely.
    pub fn reset(&self, user_key: &str) {
        let mut map = self.guard();
        if map.remove(user_key).is_some() {
            info!(user = user_key, "rate limit reset");
        }
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(now_epoch_ms())
    }

    /// Prunes every window and drops users with no attempts left in theirs.
    /// Returns the number of users dropped.
    pub fn sweep_at(&self, now_ms: i64) -> usize {
        let cutoff_ms = now_ms - self.window_ms;
        let mut map = self.guard();
        let before = map.len();
        map.retain(|_, window| {
            Self::prune(window, cutoff_ms);
            !window.is_empty()
        });
        let removed = before - map.len();
        if removed > 0 {
            debug!(removed, "swept empty rate windows");
        }
        removed
    }
}
