//! Fixed-schedule retry policy.
//!
//! The wait before attempt N+1 is the N-th entry of the backoff schedule.
//! Attempts past the end of the schedule reuse its last entry; attempts past
//! the budget give up. The defaults are fixed for test determinism: five
//! attempts with waits of 10, 30, 60, 300, and 900 seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default total attempt budget, including the first attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default backoff schedule in seconds.
pub const DEFAULT_BACKOFF_SCHEDULE_SECS: [u64; 5] = [10, 30, 60, 300, 900];

/// Retry policy for failed delivery attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the initial one.
    pub max_attempts: u32,

    /// Ordered delays; entry N-1 is the wait after attempt N fails.
    pub backoff_schedule: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_schedule: DEFAULT_BACKOFF_SCHEDULE_SECS
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        }
    }
}

/// Result of a retry decision for a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule the next attempt after the given delay.
    Retry {
        /// Wait before the next attempt becomes dequeuable.
        delay: Duration,
    },

    /// The attempt budget is exhausted; the failure is permanent.
    GiveUp,
}

impl RetryPolicy {
    /// Builds a policy from raw configuration values.
    pub fn from_parts(max_attempts: u32, backoff_schedule_secs: &[u64]) -> Self {
        Self {
            max_attempts,
            backoff_schedule: backoff_schedule_secs
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        }
    }

    /// Zero-delay variant of this policy, for deterministic tests.
    pub fn without_delays(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_schedule: vec![Duration::ZERO; max_attempts as usize],
        }
    }

    /// Decides what to do after attempt `attempt` failed transiently.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry { delay: self.delay_after(attempt) }
    }

    /// Delay between attempt N and attempt N+1.
    ///
    /// Attempts beyond the schedule length reuse the final entry so a
    /// misconfigured short schedule cannot produce a zero wait.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.backoff_schedule.is_empty() {
            return Duration::ZERO;
        }
        let index = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
        let index = index.min(self.backoff_schedule.len() - 1);
        self.backoff_schedule[index]
    }
}
