//! Bounded retry with a failure hook.
//!
//! Every flaky interaction in this crate (context resolution, element
//! lookup, scroll-and-rediscover, OTP polling) goes through [`retry`].
//!
//! A task is a pair of functions over caller-owned state:
//!
//! - `attempt(state, n)` runs attempt `n` (1-indexed)
//! - `on_failure(state, err, n)` runs after every failed attempt and may
//!   mutate the state (switch context, scroll a container) before the next
//!   one. Returning an error from the hook aborts the loop with that error.
//!
//! Borrowed collaborators (driver, config) live inside the state so the
//! boxed futures can reach them for the duration of one call.
//!
//! ```ignore
//! let policy = RetryPolicy::new(3, Duration::from_secs(3));
//! let rect = retry(&mut ctx, &policy,
//!     |ctx, _| Box::pin(async move { ctx.find_visible().await }),
//!     ignore_failures,
//! ).await?;
//! ```

use crate::result::{ProbeError, ProbeResult};
use futures::future::BoxFuture;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Predicate deciding that an error ends the loop without further attempts
pub type AbortWhen = fn(&ProbeError) -> bool;

/// Attempt count and spacing for one retry loop
#[derive(Clone, Default)]
pub struct RetryPolicy {
    /// Maximum number of attempts; values below 1 mean 1
    pub max_attempts: u32,
    /// Pause between attempts; zero skips the pause
    pub interval: Duration,
    /// Token that aborts the loop and any pending pause
    pub cancel: Option<CancellationToken>,
    /// Errors matching this predicate are returned after the hook runs
    pub abort_when: Option<AbortWhen>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("interval", &self.interval)
            .field("cancellable", &self.cancel.is_some())
            .field("aborts_early", &self.abort_when.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempts and interval
    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            cancel: None,
            abort_when: None,
        }
    }

    /// A single attempt with no pause
    #[must_use]
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Attach a cancellation token
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Attach an optional cancellation token
    #[must_use]
    pub fn with_cancel_opt(mut self, token: Option<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Stop retrying as soon as an error matches `predicate`
    #[must_use]
    pub const fn abort_when(mut self, predicate: AbortWhen) -> Self {
        self.abort_when = Some(predicate);
        self
    }

    /// Effective number of attempts
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    fn is_terminal(&self, err: &ProbeError) -> bool {
        self.abort_when.is_some_and(|predicate| predicate(err))
    }
}

/// Failure hook that does nothing
pub fn ignore_failures<'a, S: Send>(
    _state: &'a mut S,
    _err: &'a ProbeError,
    _attempt: u32,
) -> BoxFuture<'a, ProbeResult<()>> {
    Box::pin(async { Ok(()) })
}

/// Abort predicate for errors a later attempt cannot fix
pub fn not_retryable(err: &ProbeError) -> bool {
    !err.is_retryable()
}

/// Run `attempt` until it succeeds or the policy is exhausted.
///
/// The error of the last attempt is returned on exhaustion, or as soon as
/// it matches the policy's abort predicate. A
/// [`ProbeError::Cancelled`] from the task, the hook, or the token is
/// returned immediately and never handed to the hook.
pub async fn retry<S, T, A, H>(
    state: &mut S,
    policy: &RetryPolicy,
    mut attempt: A,
    mut on_failure: H,
) -> ProbeResult<T>
where
    A: for<'a> FnMut(&'a mut S, u32) -> BoxFuture<'a, ProbeResult<T>>,
    H: for<'a> FnMut(&'a mut S, &'a ProbeError, u32) -> BoxFuture<'a, ProbeResult<()>>,
{
    let max = policy.attempts();
    let mut n = 1;
    loop {
        if policy.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }
        let err = match attempt(state, n).await {
            Ok(value) => return Ok(value),
            Err(ProbeError::Cancelled) => return Err(ProbeError::Cancelled),
            Err(err) => err,
        };
        debug!(attempt = n, max, error = %err, "attempt failed");
        on_failure(state, &err, n).await?;
        if n >= max || policy.is_terminal(&err) {
            return Err(err);
        }
        pause(policy.interval, policy.cancel.as_ref()).await?;
        n += 1;
    }
}

/// Sleep for `duration` unless `cancel` fires first
pub async fn pause(duration: Duration, cancel: Option<&CancellationToken>) -> ProbeResult<()> {
    if duration.is_zero() {
        return Ok(());
    }
    match cancel {
        Some(token) => {
            tokio::select! {
                () = token.cancelled() => Err(ProbeError::Cancelled),
                () = tokio::time::sleep(duration) => Ok(()),
            }
        }
        None => {
            tokio::time::sleep(duration).await;
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Tally {
        calls: u32,
        hooks: Vec<u32>,
        succeed_at: Option<u32>,
        token: Option<CancellationToken>,
    }

    fn fail_until(tally: &mut Tally, n: u32) -> BoxFuture<'_, ProbeResult<u32>> {
        Box::pin(async move {
            tally.calls += 1;
            match tally.succeed_at {
                Some(k) if n >= k => Ok(n),
                _ => Err(ProbeError::not_found(format!("attempt {n}"))),
            }
        })
    }

    fn record_hook<'a>(
        tally: &'a mut Tally,
        _err: &'a ProbeError,
        n: u32,
    ) -> BoxFuture<'a, ProbeResult<()>> {
        Box::pin(async move {
            tally.hooks.push(n);
            Ok(())
        })
    }

    mod attempt_count_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_always_failing_runs_max_attempts() {
            let mut tally = Tally::default();
            let policy = RetryPolicy::new(4, Duration::from_secs(10));
            let err = retry(&mut tally, &policy, fail_until, record_hook)
                .await
                .unwrap_err();

            assert_eq!(tally.calls, 4);
            assert_eq!(tally.hooks, vec![1, 2, 3, 4]);
            assert!(err.to_string().contains("attempt 4"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_success_on_attempt_k() {
            let mut tally = Tally {
                succeed_at: Some(3),
                ..Tally::default()
            };
            let policy = RetryPolicy::new(5, Duration::from_secs(3));
            let value = retry(&mut tally, &policy, fail_until, record_hook)
                .await
                .unwrap();

            assert_eq!(value, 3);
            assert_eq!(tally.calls, 3);
            assert_eq!(tally.hooks, vec![1, 2]);
        }

        #[tokio::test]
        async fn test_zero_attempts_means_one() {
            let mut tally = Tally::default();
            let policy = RetryPolicy::new(0, Duration::ZERO);
            let _ = retry(&mut tally, &policy, fail_until, ignore_failures).await;
            assert_eq!(tally.calls, 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_interval_elapses_between_attempts() {
            let mut tally = Tally::default();
            let policy = RetryPolicy::new(3, Duration::from_secs(2));
            let start = tokio::time::Instant::now();
            let _ = retry(&mut tally, &policy, fail_until, ignore_failures).await;
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_secs(4));
            assert!(elapsed < Duration::from_secs(5));
        }
    }

    mod hook_tests {
        use super::*;

        #[tokio::test]
        async fn test_hook_error_aborts_immediately() {
            let mut tally = Tally::default();
            let policy = RetryPolicy::new(12, Duration::ZERO);
            let err = retry(&mut tally, &policy, fail_until, |_, _, _| {
                Box::pin(async {
                    Err(ProbeError::Unauthorized {
                        status: 401,
                        message: "bad key".to_string(),
                    })
                })
            })
            .await
            .unwrap_err();

            assert!(err.is_authorization());
            assert_eq!(tally.calls, 1);
        }

        #[tokio::test]
        async fn test_abort_predicate_stops_after_hook() {
            let mut tally = Tally::default();
            let policy = RetryPolicy::new(5, Duration::ZERO).abort_when(not_retryable);
            let err = retry(
                &mut tally,
                &policy,
                |t, _| {
                    Box::pin(async move {
                        t.calls += 1;
                        Err::<(), _>(ProbeError::NoWebContext)
                    })
                },
                record_hook,
            )
            .await
            .unwrap_err();

            assert!(matches!(err, ProbeError::NoWebContext));
            assert_eq!(tally.calls, 1);
            assert_eq!(tally.hooks, vec![1]);
        }

        #[tokio::test]
        async fn test_abort_predicate_ignores_retryable() {
            let mut tally = Tally::default();
            let policy =
                RetryPolicy::new(3, Duration::ZERO).abort_when(ProbeError::is_authorization);
            let _ = retry(&mut tally, &policy, fail_until, ignore_failures).await;
            assert_eq!(tally.calls, 3);
        }

        #[tokio::test]
        async fn test_hook_mutates_state_for_next_attempt() {
            let mut tally = Tally::default();
            let policy = RetryPolicy::new(3, Duration::ZERO);
            let value = retry(&mut tally, &policy, fail_until, |t, _, n| {
                Box::pin(async move {
                    t.succeed_at = Some(n + 1);
                    Ok(())
                })
            })
            .await
            .unwrap();
            assert_eq!(value, 2);
        }
    }

    mod cancellation_tests {
        use super::*;

        #[tokio::test]
        async fn test_cancelled_token_stops_before_first_attempt() {
            let token = CancellationToken::new();
            token.cancel();
            let mut tally = Tally::default();
            let policy = RetryPolicy::new(3, Duration::from_secs(1)).with_cancel(token);
            let err = retry(&mut tally, &policy, fail_until, record_hook)
                .await
                .unwrap_err();
            assert!(matches!(err, ProbeError::Cancelled));
            assert_eq!(tally.calls, 0);
        }

        #[tokio::test(start_paused = true)]
        async fn test_cancel_interrupts_pause() {
            let token = CancellationToken::new();
            let mut tally = Tally {
                token: Some(token.clone()),
                ..Tally::default()
            };
            let policy = RetryPolicy::new(3, Duration::from_secs(3600)).with_cancel(token);
            let start = tokio::time::Instant::now();
            let err = retry(
                &mut tally,
                &policy,
                |t, _| {
                    Box::pin(async move {
                        t.calls += 1;
                        if let Some(token) = &t.token {
                            token.cancel();
                        }
                        Err::<(), _>(ProbeError::not_found("x"))
                    })
                },
                ignore_failures,
            )
            .await
            .unwrap_err();

            assert!(matches!(err, ProbeError::Cancelled));
            assert_eq!(tally.calls, 1);
            assert!(start.elapsed() < Duration::from_secs(3600));
        }

        #[tokio::test]
        async fn test_cancelled_task_error_skips_hook() {
            let mut tally = Tally::default();
            let policy = RetryPolicy::new(3, Duration::ZERO);
            let err = retry(
                &mut tally,
                &policy,
                |_, _| Box::pin(async { Err::<(), _>(ProbeError::Cancelled) }),
                record_hook,
            )
            .await
            .unwrap_err();
            assert!(matches!(err, ProbeError::Cancelled));
            assert!(tally.hooks.is_empty());
        }
    }

    mod reentrancy_tests {
        use super::*;

        #[tokio::test]
        async fn test_nested_retry() {
            let mut outer = Tally::default();
            let policy = RetryPolicy::new(2, Duration::ZERO);
            let value = retry(
                &mut outer,
                &policy,
                |t, n| {
                    Box::pin(async move {
                        t.calls += 1;
                        let mut inner = Tally {
                            succeed_at: Some(2),
                            ..Tally::default()
                        };
                        let inner_policy = RetryPolicy::new(3, Duration::ZERO);
                        let got = retry(&mut inner, &inner_policy, fail_until, ignore_failures)
                            .await?;
                        Ok(got + n)
                    })
                },
                ignore_failures,
            )
            .await
            .unwrap();
            assert_eq!(value, 3);
            assert_eq!(outer.calls, 1);
        }
    }
}
