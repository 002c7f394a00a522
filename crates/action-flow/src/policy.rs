//! The strategy × attempt state machine.

use std::future::Future;

use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::errors::FlowError;
use crate::types::{AttemptOutcome, ExecStrategy, FlowSuccess, RetryAttempt};

/// Wraps one step's execution in escalating strategies with bounded,
/// linearly backed-off attempts per strategy. An attempt only counts as a
/// success if the caller's runner returns `Ok`; the runner is expected to
/// include both the protocol dispatch and the post-condition verification.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay applied before retrying the given attempt number (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Drive the state machine. `run` executes one attempt under the given
    /// strategy; `retryable` classifies its errors; a non-retryable error
    /// (for example a validation failure) aborts the whole step at once.
    pub async fn run_step<T, E, F, Fut, R>(
        &self,
        label: &str,
        mut run: F,
        retryable: R,
    ) -> Result<FlowSuccess<T>, FlowError>
    where
        F: FnMut(ExecStrategy, u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut history = Vec::new();
        let mut total_attempts = 0;
        let mut last_error = String::new();

        for strategy in ExecStrategy::chain() {
            for attempt in 1..=self.max_attempts {
                total_attempts += 1;
                debug!(
                    step = label,
                    strategy = strategy.name(),
                    attempt,
                    "executing step attempt"
                );

                match run(strategy, attempt).await {
                    Ok(value) => {
                        history.push(RetryAttempt {
                            strategy,
                            attempt,
                            outcome: AttemptOutcome::Success,
                            error: None,
                        });
                        if total_attempts > 1 {
                            info!(
                                step = label,
                                strategy = strategy.name(),
                                attempts = total_attempts,
                                "step recovered after retries"
                            );
                        }
                        return Ok(FlowSuccess {
                            value,
                            strategy,
                            attempts: total_attempts,
                            history,
                        });
                    }
                    Err(err) => {
                        let message = err.to_string();
                        history.push(RetryAttempt {
                            strategy,
                            attempt,
                            outcome: AttemptOutcome::Failed,
                            error: Some(message.clone()),
                        });

                        if !retryable(&err) {
                            warn!(step = label, error = %message, "non-retryable failure");
                            return Err(FlowError::Aborted {
                                reason: message,
                                history,
                            });
                        }

                        warn!(
                            step = label,
                            strategy = strategy.name(),
                            attempt,
                            error = %message,
                            "step attempt failed"
                        );
                        last_error = message;

                        if attempt < self.max_attempts {
                            sleep(self.backoff(attempt)).await;
                        }
                    }
                }
            }
            debug!(
                step = label,
                strategy = strategy.name(),
                "strategy exhausted, escalating"
            );
        }

        Err(FlowError::Exhausted {
            attempts: total_attempts,
            last_error,
            history,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[test]
    fn backoff_scales_with_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(600));
    }

    #[tokio::test]
    async fn first_attempt_success_short_circuits() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run_step(
                "s1",
                |_, _| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, String>(42) }
                },
                |_| true,
            )
            .await
            .unwrap();
        assert_eq!(result.value, 42);
        assert_eq!(result.strategy, ExecStrategy::Standard);
        assert_eq!(result.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn strategies_escalate_in_order_after_exhaustion() {
        let seen = Mutex::new(Vec::new());
        let err = fast_policy()
            .run_step(
                "s1",
                |strategy, attempt| {
                    seen.lock().unwrap().push((strategy, attempt));
                    async { Err::<(), _>("boom".to_string()) }
                },
                |_| true,
            )
            .await
            .unwrap_err();

        match err {
            FlowError::Exhausted {
                attempts,
                last_error,
                history,
            } => {
                assert_eq!(attempts, 9);
                assert_eq!(last_error, "boom");
                assert_eq!(history.len(), 9);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (ExecStrategy::Standard, 1));
        assert_eq!(seen[2], (ExecStrategy::Standard, 3));
        assert_eq!(seen[3], (ExecStrategy::Alternative, 1));
        assert_eq!(seen[6], (ExecStrategy::Simple, 1));
        assert_eq!(seen[8], (ExecStrategy::Simple, 3));
    }

    #[tokio::test]
    async fn success_under_later_strategy_is_reported() {
        let result = fast_policy()
            .run_step(
                "s1",
                |strategy, _| async move {
                    if strategy == ExecStrategy::Alternative {
                        Ok(())
                    } else {
                        Err("nope".to_string())
                    }
                },
                |_| true,
            )
            .await
            .unwrap();
        assert_eq!(result.strategy, ExecStrategy::Alternative);
        assert_eq!(result.attempts, 4);
    }

    #[tokio::test]
    async fn non_retryable_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let err = fast_policy()
            .run_step(
                "s1",
                |_, _| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("malformed step".to_string()) }
                },
                |_| false,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::Aborted { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
