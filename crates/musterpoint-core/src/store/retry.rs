//! Re-running transactions that fail transiently.
//!
//! The body handed to [`run_in_transaction`] opens, uses and commits its own
//! transaction, so every attempt starts from a clean snapshot. Bodies must
//! not do anything outside the store that cannot be repeated.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{ServiceError, StoreError};

/// How often and how patiently to re-run a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles after each failure.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Run once, never retry.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff after the `failed_attempt`-th failure (1-based), with up to
    /// 50% random jitter added.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        let jitter_ms = (backoff.as_millis() / 2) as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        backoff + Duration::from_millis(jitter)
    }
}

/// Run `body` until it succeeds, fails fatally, or the policy runs out.
///
/// `operation` names the call in logs and errors.
pub async fn run_in_transaction<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut body: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match body().await {
            Ok(value) => return Ok(value),
            Err(StoreError::Transient(cause)) if attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %format!("{cause:#}"),
                    "transaction failed transiently, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(StoreError::Transient(last)) => {
                return Err(ServiceError::RetriesExhausted {
                    operation,
                    attempts: attempt,
                    last,
                });
            }
            Err(StoreError::Fatal(cause)) => {
                return Err(ServiceError::Store { operation, cause });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };
        let first = policy.delay_after(1);
        assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(15));
        let third = policy.delay_after(3);
        assert!(third >= Duration::from_millis(40) && third <= Duration::from_millis(60));
        let late = policy.delay_after(30);
        assert!(late >= Duration::from_millis(50) && late <= Duration::from_millis(75));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = &AtomicU32::new(0);
        let result = run_in_transaction(&fast(), "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::transient("serialization failure"))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let err = run_in_transaction(&fast(), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StoreError::transient("deadlock"))
        })
        .await
        .unwrap_err();

        assert!(err.is_transient());
        assert!(matches!(err, ServiceError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let err = run_in_transaction(&fast(), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StoreError::fatal("bad row"))
        })
        .await
        .unwrap_err();

        assert!(!err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_retry_runs_once() {
        let calls = &AtomicU32::new(0);
        let err = run_in_transaction(&RetryPolicy::no_retry(), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StoreError::transient("busy"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ServiceError::RetriesExhausted { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
