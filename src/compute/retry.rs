//! Retry policy for transient warehouse failures
//!
//! Retries apply at single-experiment granularity and only to failures the
//! error taxonomy marks retryable (timeouts, transient query failures).
//! Lookup and schema failures fail fast.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one. `1` disables retries.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Backoff growth factor per attempt.
    pub multiplier: f64,
    /// Upper bound on any single backoff.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Configuration that never retries.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(0),
            multiplier: 1.0,
            max_backoff: Duration::from_millis(0),
        }
    }

    /// Backoff to wait after the given 1-based failed attempt.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_possible_wrap,
            clippy::cast_precision_loss,
            clippy::cast_sign_loss
        )]
        let millis = (self.initial_backoff.as_millis() as f64
            * self.multiplier.powi(attempt.saturating_sub(1) as i32)) as u64;
        Duration::from_millis(millis).min(self.max_backoff)
    }
}
