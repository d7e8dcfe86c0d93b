//! Bounded Retry
//!
//! One retry loop for every indexer call: `max_attempts` tries, a fixed or
//! doubling delay between them, and a predicate deciding which errors are
//! worth another attempt. Non-retryable errors return immediately.
//!
//! Created: 2026-03-04

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Delay cap for doubling backoff
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Doubling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    /// 3 attempts, 2s apart
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(2))
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn doubling(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: Backoff::Doubling,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay before attempt `attempt` (0-based; attempt 0 never waits).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Doubling => {
                let factor = 1u32 << (attempt - 1).min(8);
                self.delay.saturating_mul(factor).min(MAX_BACKOFF.max(self.delay))
            }
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
/// Returns the last error on exhaustion.
pub async fn retry<T, E, F, Fut, P>(policy: &RetryPolicy, mut op: F, is_retryable: P) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let wait = policy.delay_before(attempt);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if !is_retryable(&e) || attempt >= attempts {
                    return Err(e);
                }
                debug!("Attempt {}/{} failed: {} (retrying)", attempt, attempts, e);
            }
        }
    }
}
