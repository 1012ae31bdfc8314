//! Retry policy shared by every outbound call
//!
//! Exponential backoff without jitter: `backoff_factor * 2^(attempt-1)`
//! seconds after a failed attempt, never after the last one.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Seconds; multiplied by `2^(attempt-1)`
    pub backoff_factor: f64,
    /// Status codes treated as transient
    pub retry_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_factor: 1.0,
            retry_statuses: [429, 500, 502, 503, 504].into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.backoff_factor * 2_f64.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    pub fn is_last_attempt(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
