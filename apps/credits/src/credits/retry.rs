//! Bounded exponential backoff.
//!
//! Delay before retry `n` (0-indexed attempt that just failed) is
//! `base_delay * 2^n`: 1, 2, 4, ... units. No jitter, no sleep after the last
//! attempt.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// An attempt result the policy can inspect and, on exhaustion, annotate.
pub trait Retryable {
    fn is_success(&self) -> bool;
    fn failure_reason(&self) -> Option<&str>;
    /// Final form of a failed result after `attempts` tries.
    fn exhausted(self, attempts: u32) -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY)
    }
}

impl RetryPolicy {
    /// `max_attempts` of zero is treated as one.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self::new(max_attempts, self.base_delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `operation(attempt)` until it succeeds or the budget is spent.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> T
    where
        T: Retryable,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut attempt = 0;
        loop {
            let outcome = operation(attempt).await;
            if outcome.is_success() {
                if attempt > 0 {
                    info!("Succeeded on attempt {}", attempt + 1);
                }
                return outcome;
            }

            warn!(
                "Attempt {} of {} failed: {}",
                attempt + 1,
                self.max_attempts,
                outcome.failure_reason().unwrap_or("unknown error")
            );

            if attempt + 1 >= self.max_attempts {
                return outcome.exhausted(self.max_attempts);
            }

            let delay = self.delay_for(attempt);
            info!("Retrying in {}ms...", delay.as_millis());
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
