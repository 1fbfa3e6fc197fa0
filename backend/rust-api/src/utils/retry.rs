use std::future::Future;
use std::time::Duration;

/// Backoff policy for calls to external services (quiz generator, object storage).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            jitter_max: Some(Duration::from_millis(100)),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based), without jitter.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        std::cmp::min(self.base_backoff.saturating_mul(factor), self.max_backoff)
    }

    fn jitter(&self) -> Duration {
        match self.jitter_max {
            Some(max) if !max.is_zero() => {
                let max_ms = max.as_millis() as u64;
                Duration::from_millis(rand::random::<u64>() % (max_ms + 1))
            }
            _ => Duration::ZERO,
        }
    }
}

/// Runs `f` until it succeeds, `should_retry` rejects the error, or attempts run out.
pub async fn retry_with_policy<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut should_retry: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt as usize >= policy.max_attempts || !should_retry(&err) {
                    return Err(err);
                }

                let wait = policy.backoff_for(attempt) + policy.jitter();
                tracing::warn!(
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "Retrying external call after error: {}",
                    err
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}
