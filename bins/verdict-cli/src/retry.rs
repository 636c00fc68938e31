// Bounded retry with a fixed delay

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (at least 1)
    pub attempts: u32,
    /// Pause between a failed attempt and the next one
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    Succeeded(T),
    /// Every attempt failed with a retryable error; holds the last one
    Exhausted(E),
    /// A non-retryable error stopped the loop early
    Aborted(E),
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempts run out. `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut, P>(policy: &RetryPolicy, is_retryable: P, mut op: F) -> RetryOutcome<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return RetryOutcome::Succeeded(value),
            Err(e) if !is_retryable(&e) => return RetryOutcome::Aborted(e),
            Err(e) if attempt >= attempts => return RetryOutcome::Exhausted(e),
            Err(e) => {
                warn!("Attempt {}/{} failed, retrying: {}", attempt, attempts, e);
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let outcome = retry(&policy(5), |_: &String| true, |attempt| {
            calls.set(calls.get() + 1);
            async move {
                if attempt < 3 {
                    Err(format!("fail {}", attempt))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(outcome, RetryOutcome::Succeeded(3));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_keeps_last_error() {
        let outcome: RetryOutcome<(), String> =
            retry(&policy(3), |_| true, |attempt| async move { Err(format!("fail {}", attempt)) })
                .await;

        assert_eq!(outcome, RetryOutcome::Exhausted("fail 3".to_string()));
    }

    #[tokio::test]
    async fn test_non_retryable_aborts_immediately() {
        let calls = Cell::new(0);
        let outcome: RetryOutcome<(), String> = retry(&policy(10), |e: &String| e != "fatal", |_| {
            calls.set(calls.get() + 1);
            async { Err("fatal".to_string()) }
        })
        .await;

        assert_eq!(outcome, RetryOutcome::Aborted("fatal".to_string()));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.attempts, 1);

        let outcome: RetryOutcome<u32, String> = retry(&policy, |_| true, |_| async { Ok(7) }).await;
        assert_eq!(outcome, RetryOutcome::Succeeded(7));
    }
}
