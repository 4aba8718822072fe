//! Retry with linear backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use crate::error::UploadError;

/// How often and how patiently to retry an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u8,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn linear(max_retries: u8, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn none() -> Self {
        Self::linear(0, Duration::ZERO)
    }

    /// Delay before retry number `retry` (1-based): `retry * base_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries as u32 + 1
    }
}

/// Whether an error is worth another attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for UploadError {
    fn is_retryable(&self) -> bool {
        // Bad input stays bad
        !matches!(
            self,
            UploadError::Validation(_)
                | UploadError::Compression(_)
                | UploadError::AllFailed(_)
                | UploadError::LocationFull { .. }
        )
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy is exhausted.
///
/// `op` receives the 1-based attempt number. The last error is returned.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    // Wider than `max_retries` so the last attempt is always reachable
    let mut attempt: u32 = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= policy.max_attempts() => {
                tracing::error!(label, attempt, error = %e, "Giving up after final attempt");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
