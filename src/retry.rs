// src/retry.rs

//! Retry with exponential backoff and full jitter.
//!
//! Only errors whose [`StagehandError::is_transient`] holds are retried; any
//! other error is returned on the spot. Each call site passes its own
//! [`RetryPolicy`], so exhausting retries for one operation never affects
//! another.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{Result, StagehandError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// `n` attempts without any delay in between.
    pub fn immediate(n: usize) -> Self {
        Self::new(n, Duration::ZERO, Duration::ZERO)
    }

    /// Sleep before retry number `attempt` (1-based): a uniform draw from
    /// `0..=min(max_delay, base_delay * 2^(attempt-1))`.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(31);
        let base = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let cap = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let ceiling = base.saturating_mul(1u64 << exp).min(cap);
        if ceiling == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(fastrand::u64(0..=ceiling))
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn retry_async<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= attempts => {
                warn!(op = op_name, attempts, error = %err, "Retries exhausted");
                return Err(StagehandError::RetriesExhausted {
                    op: op_name.to_string(),
                    attempts,
                    source: Box::new(err),
                });
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                debug!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
