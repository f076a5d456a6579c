//! Restart Policies and Tracking
//!
//! Bounds how often a failing component may be restarted. The consumer
//! controller records every failed start here: each allowed attempt yields an
//! exponentially growing backoff. Once the limit within the window is reached
//! the controller holds off further starts until the window has passed.
//!
//! Timestamps use `tokio::time::Instant` so paused-clock tests control the
//! window.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Policy for restarting failed components
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Maximum number of restarts within the time window
    pub max_restarts: u32,
    /// Time window for counting restarts
    pub window: Duration,
    /// Initial backoff duration between restarts
    pub backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            window: Duration::from_secs(60),
            backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RestartPolicy {
    pub fn new(max_restarts: u32, window: Duration, backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_restarts,
            window,
            backoff,
            max_backoff,
        }
    }
}

/// Tracks restart history for a single component
#[derive(Debug)]
pub struct RestartTracker {
    policy: RestartPolicy,
    /// Timestamps of recent restarts (within window)
    restart_times: VecDeque<Instant>,
    /// Number of consecutive restarts (for backoff calculation)
    consecutive_restarts: u32,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            restart_times: VecDeque::new(),
            consecutive_restarts: 0,
        }
    }

    /// Record a restart attempt.
    ///
    /// Returns `Some(backoff)` if the restart is allowed, or `None` once the
    /// limit within the window has been reached.
    pub fn record_restart(&mut self) -> Option<Duration> {
        let now = Instant::now();
        self.evict_expired(now);

        if self.restart_times.len() >= self.policy.max_restarts as usize {
            return None;
        }

        self.restart_times.push_back(now);
        self.consecutive_restarts += 1;
        Some(self.calculate_backoff())
    }

    fn evict_expired(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.policy.window) else {
            return;
        };
        while self.restart_times.front().is_some_and(|t| *t < cutoff) {
            self.restart_times.pop_front();
        }
    }

    fn calculate_backoff(&self) -> Duration {
        let exponent = self.consecutive_restarts.saturating_sub(1).min(31);
        self.policy
            .backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.policy.max_backoff)
    }

    /// Reset the consecutive restart counter after a successful start
    pub fn reset(&mut self) {
        self.consecutive_restarts = 0;
    }

    /// Number of restarts within the current window
    pub fn restart_count(&self) -> usize {
        self.restart_times.len()
    }
}
