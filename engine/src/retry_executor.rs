//! Runs a fallible operation under a pluggable back-off policy: try, log,
//! back off, try again, all driven by policy data rather than one bespoke
//! loop per call site.

use std::{future::Future, time::Duration};

use replay_types::{ReplayError, RetryPolicy};

/// A predicate over a raised error deciding whether the executor should
/// retry it. The default refuses to retry `target-down` and
/// `hash-mismatch`; callers needing stricter behavior (e.g. transaction
/// inject, which must not retry *any* fatal class) pass a narrower one.
pub type IsRetryable = fn(&ReplayError) -> bool;

pub fn default_is_retryable(err: &ReplayError) -> bool {
    err.default_is_retryable()
}

/// Executes `op` under `policy`, retrying attempts classified retryable by
/// `is_retryable` until the policy is exhausted or a non-retryable error
/// appears. `op` is given the 1-based attempt number it is being called for.
pub async fn execute<T, F, Fut>(
    op_name: &str,
    policy: RetryPolicy,
    is_retryable: IsRetryable,
    mut op: F,
) -> Result<T, ReplayError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ReplayError>>,
{
    let mut attempt = 1u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !is_retryable(&err) => {
                tracing::debug!(op = op_name, code = err.code(), "non-retryable error, surfacing immediately");
                return Err(err);
            }
            Err(err) => match policy.delay(attempt) {
                Some(delay) => {
                    tracing::warn!(op = op_name, attempt, code = err.code(), ?delay, "retrying after transient error: {err}");
                    sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    tracing::error!(op = op_name, attempt, code = err.code(), "retry policy exhausted");
                    return Err(err);
                }
            },
        }
    }
}

async fn sleep(delay: Duration) {
    tokio::time::sleep(delay).await;
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};

    use replay_types::BackoffKind;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { kind: BackoffKind::Fixed, base: Duration::from_millis(1), cap: None, max_attempts: 5 };
        let result = execute("test", policy, default_is_retryable, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(ReplayError::Transport("not yet".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy { kind: BackoffKind::Fixed, base: Duration::from_millis(1), cap: None, max_attempts: 2 };
        let result: Result<(), _> =
            execute("test", policy, default_is_retryable, |_| async { Err(ReplayError::Transport("nope".into())) }).await;
        assert!(matches!(result, Err(ReplayError::Transport(_))));
    }

    #[tokio::test]
    async fn target_down_is_never_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::source_block_fetch();
        let result: Result<(), _> = execute("test", policy, default_is_retryable, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ReplayError::TargetDown("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
