// src/outbox/retry.rs
// Shared retry policy for network writes

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Errors that can tell whether another attempt is worth making.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::storage::StorageError {
    fn is_retryable(&self) -> bool {
        self.is_retryable()
    }
}

impl Retryable for crate::translate::TranslateError {
    fn is_retryable(&self) -> bool {
        self.is_retryable()
    }
}

impl Retryable for crate::reorganize::ReorganizeError {
    fn is_retryable(&self) -> bool {
        self.is_retryable()
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Policy used for persistence writes: 3 attempts, 1000ms × attempt between.
    pub fn persistence() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay applied after a failed `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Run `op` until it succeeds, the error is not retryable, or attempts run out.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= policy.max_attempts() || !e.is_retryable() {
                    return Err(e);
                }

                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    "Attempt {}/{} failed: {} — retrying in {:?}",
                    attempt,
                    policy.max_attempts(),
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
