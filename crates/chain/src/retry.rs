use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::ChainError;

/// Bounded exponential backoff for reads. No jitter: reads are
/// single-caller, there is nothing to decorrelate.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts:   u32,
    pub base_delay: Duration,
    pub max_delay:  Duration
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, base_delay: Duration::from_secs(1), max_delay: Duration::from_secs(10) }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, after `attempt` failed.
    fn delay_after(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << (attempt.saturating_sub(1)).min(16));
        exp.min(self.max_delay)
    }
}

/// Runs `op` with the default policy, reporting cancellation distinctly
/// from the last RPC failure.
pub async fn retry_read<T, F, Fut>(
    label: &str,
    token: &CancellationToken,
    op: F
) -> Result<T, ChainError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>
{
    retry_read_with(RetryPolicy::default(), label, token, op).await
}

pub async fn retry_read_with<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    token: &CancellationToken,
    op: F
) -> Result<T, ChainError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>
{
    let mut last_error = None;

    for attempt in 1..=policy.attempts {
        if token.is_cancelled() {
            return Err(ChainError::Cancelled { label: label.to_string() })
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(ChainError::Cancelled { label: label.to_string() })
            }
            result = op() => result
        };

        match result {
            Ok(value) => return Ok(value),
            Err(error) => {
                warn!(%label, attempt, %error, "read failed");
                last_error = Some(error);
            }
        }

        if attempt < policy.attempts {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(ChainError::Cancelled { label: label.to_string() })
                }
                _ = tokio::time::sleep(policy.delay_after(attempt)) => {}
            }
        }
    }

    Err(ChainError::RetriesExhausted {
        label:    label.to_string(),
        attempts: policy.attempts,
        message:  last_error.map(|e| e.to_string()).unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_later_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let counter = calls.clone();
        let result = retry_read("slot0", &token, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ChainError::Rpc { chain: 8453, message: "connection reset".into() })
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let counter = calls.clone();
        let result: Result<u32, _> = retry_read("liquidity", &token, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ChainError::Rpc { chain: 10, message: "timeout".into() })
            }
        })
        .await;

        match result {
            Err(ChainError::RetriesExhausted { attempts, message, .. }) => {
                assert_eq!(attempts, 3);
                assert!(message.contains("timeout"));
            }
            other => panic!("expected exhaustion, got {other:?}")
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins_over_the_last_error() {
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<u32, _> =
            retry_read("balances", &token, || async { Ok(1u32) }).await;
        assert!(matches!(result, Err(ChainError::Cancelled { .. })));
    }

    #[test]
    fn backoff_is_bounded_by_max_delay() {
        let policy = RetryPolicy {
            attempts:   5,
            base_delay: Duration::from_secs(4),
            max_delay:  Duration::from_secs(10)
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(4));
        assert_eq!(policy.delay_after(2), Duration::from_secs(8));
        assert_eq!(policy.delay_after(3), Duration::from_secs(10));
        assert_eq!(policy.delay_after(4), Duration::from_secs(10));
    }
}
