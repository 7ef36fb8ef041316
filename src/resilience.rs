// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience utilities: retry backoff for trigger sources.
//!
//! When a trigger source terminates (its change feed closes, an arm's event
//! channel goes away, or the source reports an error) the aggregator can open
//! it again. [`RetryConfig`] decides how long to wait between attempts and when
//! to give up.
//!
//! # Example
//!
//! ```rust
//! use replica_monitor::resilience::RetryConfig;
//! use std::time::Duration;
//!
//! let retry = RetryConfig::daemon();
//! assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(1));
//! assert_eq!(retry.delay_for_attempt(3), Duration::from_secs(4));
//! ```

use std::time::Duration;

/// How a terminated trigger source is reopened.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Reopen attempts before the source is abandoned. `usize::MAX` never gives up.
    pub max_attempts: usize,

    /// Wait before the first reopen.
    pub initial_delay: Duration,

    /// Upper bound on any single wait.
    pub max_delay: Duration,

    /// Growth of the wait per consecutive failed attempt.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Keep reopening for as long as the subscription lives.
    ///
    /// ```text
    /// attempt   1    2    3   ...   9     10+
    /// wait      1s   2s   4s  ...   256s  300s
    /// ```
    pub fn daemon() -> Self {
        Self {
            max_attempts: usize::MAX,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
        }
    }

    /// Short waits and an early give-up, for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        }
    }

    /// Wait before reopen number `attempt` (1-based; 0 is treated as 1).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let exponent = (attempt - 1).min(i32::MAX as usize) as i32;
        let multiplier = self.backoff_factor.powi(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        std::cmp::min(Duration::from_secs_f64(delay_secs), self.max_delay)
    }

    /// True once `attempt` retries have been used up.
    pub fn exhausted(&self, attempt: usize) -> bool {
        attempt >= self.max_attempts
    }
}
