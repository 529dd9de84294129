//! Capped exponential backoff for calls to remotes

use crate::remote::RemoteError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry budget for one remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Upper bound of the delay before retry number `attempt` (1-based)
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Full-jitter delay before retry number `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }

    /// Run `call` until it succeeds, fails permanently, or the budget runs out
    ///
    /// The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Remote call failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_ceiling_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.ceiling(1), Duration::from_millis(250));
        assert_eq!(policy.ceiling(2), Duration::from_millis(500));
        assert_eq!(policy.ceiling(10), Duration::from_secs(5));
        for attempt in 1..20 {
            assert!(policy.delay(attempt) <= policy.max_delay);
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast(3)
            .run("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RemoteError::Transient("connection refused".into()))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fast(2)
            .run("test", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Transient(format!("failure {}", n)))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err().to_string(), "Remote unreachable: failure 2");
    }

    #[tokio::test]
    async fn test_auth_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fast(3)
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Auth("invalid signature".into()))
            })
            .await;

        assert!(matches!(result, Err(RemoteError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
