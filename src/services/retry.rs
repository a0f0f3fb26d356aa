//! Bounded retries with exponential backoff and jitter.
//!
//! [`with_retry`] re-runs a unit of work while it fails with a retryable
//! error. Each unit is either an idempotent read or a whole transaction, so a
//! failed attempt leaves nothing behind.

use crate::error::{AppError, ErrorKind};
use crate::services::context::OpContext;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Pause after the failed attempt `attempt` (0-based):
    /// `base * 2^attempt + uniform[0, base)`.
    pub fn backoff_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_backoff;
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exponential = base.saturating_mul(factor);

        let base_nanos = u64::try_from(base.as_nanos()).unwrap_or(u64::MAX);
        let jitter = if base_nanos == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(rng.gen_range(0..base_nanos))
        };

        exponential.saturating_add(jitter)
    }
}

/// Run `unit` until it succeeds, fails permanently, or the policy runs out.
///
/// - Retryable failures (transient store errors, concurrent modification)
///   are retried after [`RetryPolicy::backoff_for`].
/// - Any other failure is returned unchanged after that attempt.
/// - When `ctx` ends during an attempt or a pause, `Cancelled` or
///   `DeadlineExceeded` is returned and no further attempts run.
/// - After the last attempt fails, the error is wrapped in `RetriesExhausted`.
pub async fn with_retry<T, F, Fut>(
    ctx: &OpContext,
    policy: &RetryPolicy,
    operation: &str,
    mut unit: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let max_attempts = policy.attempts();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let err = match ctx.run(unit()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match err.kind() {
            ErrorKind::Cancelled => {
                log::error!("[retry] {} aborted on attempt {}: {}", operation, attempt, err);
                return Err(err);
            }
            ErrorKind::Permanent => {
                log::error!("[retry] {} failed permanently: {}", operation, err);
                return Err(err);
            }
            _ if !err.is_retryable() => return Err(err),
            _ => {}
        }

        if attempt >= max_attempts {
            log::error!(
                "[retry] {} failed after {} attempts: {}",
                operation,
                attempt,
                err
            );
            return Err(AppError::RetriesExhausted {
                operation: operation.to_string(),
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let pause = policy.backoff_for(attempt - 1, &mut rand::thread_rng());
        log::warn!(
            "[retry] {} attempt {}/{} failed: {}; retrying in {:?}",
            operation,
            attempt,
            max_attempts,
            err,
            pause
        );

        if let Err(stop) = ctx.sleep(pause).await {
            log::error!("[retry] {} aborted during backoff: {}", operation, stop);
            return Err(stop);
        }
    }
}
