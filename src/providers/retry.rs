//! Exponential backoff with jitter for transient provider failures.
//!
//! Permanent failures (auth, bad request, content policy) are never retried
//! and surface immediately as `CastError::ProviderPermanent`. Transient
//! failures (timeouts, 429, 5xx) are retried up to `max_attempts` times with
//! exponentially growing, jittered delay, honoring a server-supplied
//! `Retry-After` header when present.

use crate::exceptions::{CastError, CastResult};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl BackoffConfig {
    /// Delay before attempt `attempt` (1-indexed), before jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1 << attempt.min(8));
        exp.min(self.max_delay)
    }
}

/// Whether a provider-level failure should be retried, and with what
/// server-suggested delay if any.
pub enum Classification {
    Transient { retry_after: Option<Duration> },
    Permanent,
}

/// Jitter a delay by up to +/-25%, deterministically seeded from the attempt
/// number so retries of the same call don't all land on the same instant.
fn jittered(delay: Duration, attempt: u32) -> Duration {
    let micros = delay.as_micros().max(1) as u64;
    let spread = micros / 4;
    let pseudo = (attempt as u64).wrapping_mul(2_654_435_761) % spread.max(1);
    Duration::from_micros(micros - spread / 2 + pseudo)
}

/// Run `attempt_fn` up to `config.max_attempts` times. `classify` inspects a
/// failed result's error message to decide whether to retry; a permanent
/// classification aborts immediately without spending remaining attempts.
pub async fn run_with_backoff<T, F, Fut>(
    provider: &str,
    config: BackoffConfig,
    classify: impl Fn(&CastError) -> Classification,
    mut attempt_fn: F,
) -> CastResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CastResult<T>>,
{
    let mut last_err = None;
    for attempt in 1..=config.max_attempts {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let classification = classify(&err);
                let retry_after = match classification {
                    Classification::Permanent => return Err(err),
                    Classification::Transient { retry_after } => retry_after,
                };
                if attempt == config.max_attempts {
                    last_err = Some(err);
                    break;
                }
                let delay = retry_after.unwrap_or_else(|| jittered(config.delay_for(attempt), attempt));
                crate::logging::report_progress(crate::logging::ProgressEvent::RetryAttempt {
                    operation: provider.to_string(),
                    attempt,
                    max_attempts: config.max_attempts,
                    delay_ms: delay.as_millis() as u64,
                });
                tokio::time::sleep(delay).await;
                last_err = Some(err);
            }
        }
    }

    Err(CastError::provider_transient(
        provider,
        config.max_attempts,
        last_err.map(|e| e.to_string()).unwrap_or_default(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn succeeds_on_first_try_without_sleeping() {
        let result: CastResult<u32> = run_with_backoff(
            "test",
            BackoffConfig {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                max_attempts: 3,
            },
            |_| Classification::Transient { retry_after: None },
            || async { Ok(7) },
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = Cell::new(0);
        let result: CastResult<u32> = run_with_backoff(
            "test",
            BackoffConfig::default(),
            |_| Classification::Permanent,
            || {
                calls.set(calls.get() + 1);
                async { Err(CastError::provider_permanent("test", "bad key")) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn transient_failure_exhausts_attempts_then_errors() {
        let calls = Cell::new(0);
        let result: CastResult<u32> = run_with_backoff(
            "test",
            BackoffConfig {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                max_attempts: 2,
            },
            |_| Classification::Transient { retry_after: None },
            || {
                calls.set(calls.get() + 1);
                async { Err(CastError::provider_transient("test", 1, "timeout")) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 2);
    }
}
