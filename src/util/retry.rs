use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Errors that know whether repeating the failed operation may succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Capped exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (zero based): initial, 2x, 4x, ... up to `max_backoff`.
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted.
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Debug,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= policy.max_retries => return Err(e),
            Err(e) => {
                let backoff = policy.backoff_for(attempt);
                warn!(
                    "Retryable error in {} (attempt {}/{}), backoff_ms={}: {:?}",
                    operation_name,
                    attempt + 1,
                    policy.max_retries,
                    backoff.as_millis(),
                    e
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
