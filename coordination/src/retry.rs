//! Cancellable retry with linear backoff
//!
//! Attempt `n` that fails is followed by a delay of `n × base_delay` before
//! attempt `n + 1`. The delay is a tokio timer, so waiting never blocks a
//! worker thread. The cancellation token is checked before each attempt,
//! before a delay is scheduled, and again as soon as the delay resolves.
//!
//! ```text
//! attempt 1 ──fail──▶ sleep 1×base ──▶ attempt 2 ──fail──▶ sleep 2×base ──▶ ...
//!     │                   │                                    │
//!     └──── cancel ───────┴──────────────── Cancelled ◀────────┘
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first; 0 is treated as 1
    pub max_attempts: u32,
    /// Delay unit, multiplied by the attempt number
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
        }
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt)))
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Why a retried operation gave up
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: fmt::Display> {
    #[error("retry cancelled")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// The operation failed in a way the caller marked as not worth retrying
    #[error("{0}")]
    Fatal(E),
}

impl<E: fmt::Display> RetryError<E> {
    /// The operation's own error, if there was one
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Fatal(e) => Some(e),
        }
    }
}

/// Retry every error
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    op: F,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_when(policy, cancel, op, |_| true).await
}

/// Retry errors for which `retryable` returns true; others end immediately
pub async fn retry_when<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
    retryable: P,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !retryable(&err) {
            return Err(RetryError::Fatal(err));
        }
        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.delay_for(attempt);
        warn!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, error = %err, "Attempt failed, retrying");

        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(attempt, "Retry cancelled during backoff");
                return Err(RetryError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy::new(4, Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(3), Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let token = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let result = retry_with_backoff(&policy, &token, |attempt| async move {
            if attempt < 3 {
                Err(format!("attempt {attempt} failed"))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        // 1s after the first failure, 2s after the second.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_keeps_last_error() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = retry_with_backoff(&policy, &token, move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("boom {attempt}")) }
        })
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last, "boom 2");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<(), RetryError<String>> =
            retry_with_backoff(&RetryPolicy::default(), &token, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_backoff() {
        let policy = RetryPolicy::new(5, Duration::from_secs(60));
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let counter = calls.clone();
        let result: Result<(), _> = retry_with_backoff(&policy, &token, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err("down".to_string()) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let token = CancellationToken::new();
        let result: Result<(), _> = retry_when(
            &policy,
            &token,
            |_| async { Err("fatal".to_string()) },
            |e: &String| e != "fatal",
        )
        .await;
        assert!(matches!(result, Err(RetryError::Fatal(ref e)) if e == "fatal"));
    }
}
