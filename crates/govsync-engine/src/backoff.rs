//! Bounded retry with capped exponential backoff.
//!
//! Every sleep is raced against the session's cancellation token, and so is
//! every attempt, so a cancelled run never waits out a delay or a slow call.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RetrySettings;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    /// Retry, waiting at least the server-requested duration.
    RetryAfter(Duration),
    Fail,
}

/// State handed to each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Delay applied if this attempt fails and is retried.
    pub next_delay: Duration,
    pub max_attempts: u32,
}

impl RetryState {
    pub fn is_last(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The classifier refused to retry.
    Failed { attempts: u32, error: E },
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Failed { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { error, .. } => write!(f, "{error}"),
            Self::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            Self::Cancelled { attempts } => write!(f, "cancelled after {attempts} attempts"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: max_delay.max(initial_delay),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_attempts,
            Duration::from_millis(settings.initial_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay after the `failures`-th failure: `min(initial * 2^(failures-1), max)`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `operation` until it succeeds, the classifier says stop, attempts
    /// run out, or `cancel` fires.
    pub async fn run<T, E, C, F, Fut>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        classify: C,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        C: Fn(&E) -> RetryDecision,
        F: FnMut(RetryState) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled {
                    attempts: attempt - 1,
                });
            }

            let state = RetryState {
                attempt,
                next_delay: self.delay_for(attempt),
                max_attempts: self.max_attempts,
            };
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
                result = operation(state) => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let delay = match classify(&error) {
                RetryDecision::Fail => {
                    return Err(RetryError::Failed {
                        attempts: attempt,
                        error,
                    });
                }
                RetryDecision::Retry => state.next_delay,
                RetryDecision::RetryAfter(hint) => state.next_delay.max(hint).min(self.max_delay),
            };

            if state.is_last() {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            warn!(
                operation = operation_name,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying"
            );
            if !sleep_or_cancel(delay, cancel).await {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
        }
    }
}

/// Sleeps for `delay`. Returns `false` when `cancel` fired first.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(4, Duration::from_millis(5), Duration::from_millis(12))
    }

    #[test]
    fn test_delays_are_non_decreasing_and_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(1_000));
        let delays: Vec<_> = (1..=10).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000, 1000, 1000, 1000, 1000]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_huge_attempt_numbers_do_not_overflow() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_always_retryable_runs_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let result: Result<(), _> = policy()
            .run(
                "lookup",
                &CancellationToken::new(),
                |_: &String| RetryDecision::Retry,
                |state| {
                    let seen = seen.clone();
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Err(format!("attempt {} failed", state.attempt))
                    }
                },
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 4,
                last: "attempt 4 failed".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_fatal_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .run(
                "create",
                &CancellationToken::new(),
                |_: &&str| RetryDecision::Fail,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("forbidden") }
                },
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Failed { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let result = policy()
            .run(
                "lookup",
                &CancellationToken::new(),
                |_: &&str| RetryDecision::Retry,
                |state| async move {
                    if state.attempt < 3 {
                        Err("not yet")
                    } else {
                        Ok(state.attempt)
                    }
                },
            )
            .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_retry_after_is_capped_by_max_delay() {
        let started = Instant::now();
        let _: Result<(), _> = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(40))
            .run(
                "list",
                &CancellationToken::new(),
                |_: &&str| RetryDecision::RetryAfter(Duration::from_secs(60)),
                |_| async { Err("throttled") },
            )
            .await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_the_delay() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(5, Duration::from_secs(30), Duration::from_secs(30));
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result: Result<(), _> = policy
            .run(
                "lookup",
                &cancel,
                |_: &&str| RetryDecision::Retry,
                |_| async { Err("unavailable") },
            )
            .await;
        assert_eq!(result, Err(RetryError::Cancelled { attempts: 1 }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_the_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<&str>> = policy()
            .run(
                "lookup",
                &cancel,
                |_| RetryDecision::Retry,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
            )
            .await;
        assert_eq!(result, Err(RetryError::Cancelled { attempts: 0 }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
