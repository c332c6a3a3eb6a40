//! Per-provider concurrency and rate-limiting.
//!
//! Each provider owns one `ProviderThrottle`: a semaphore bounding in-flight
//! requests, and an optional token-bucket limiter for requests/minute and
//! tokens/minute. Suspension happens at three points: before acquiring the
//! semaphore, before acquiring the rate bucket, and for the duration of the
//! HTTP call itself (the call site owns that third wait).

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};

/// A sliding 60-second window of request/token counts, used to decide
/// whether issuing a call now would breach a requests-per-minute or
/// tokens-per-minute ceiling.
struct Window {
    started_at: Instant,
    requests: u32,
    tokens: u32,
}

impl Window {
    fn fresh() -> Self {
        Self {
            started_at: Instant::now(),
            requests: 0,
            tokens: 0,
        }
    }

    fn roll_if_expired(&mut self) {
        if self.started_at.elapsed() >= Duration::from_secs(60) {
            *self = Window::fresh();
        }
    }
}

/// Bounds concurrency and (optionally) request/token throughput for one
/// provider. Shared across all concurrent callers via `Arc`; the internal
/// mutex serializes only the bookkeeping, never the HTTP call itself.
pub struct ProviderThrottle {
    semaphore: Semaphore,
    requests_per_minute: Option<u32>,
    tokens_per_minute: Option<u32>,
    window: Mutex<Window>,
}

impl ProviderThrottle {
    pub fn new(max_concurrency: usize, requests_per_minute: Option<u32>, tokens_per_minute: Option<u32>) -> Self {
        Self {
            semaphore: Semaphore::new(max_concurrency.max(1)),
            requests_per_minute,
            tokens_per_minute,
            window: Mutex::new(Window::fresh()),
        }
    }

    /// Acquire a concurrency slot, suspending until one frees up.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("provider semaphore is never closed")
    }

    /// Suspend until issuing a call with an estimated `prompt_tokens` would
    /// not breach the rolling-window ceilings, then record the reservation.
    /// Call once per attempt, after acquiring a concurrency slot and before
    /// the HTTP call.
    pub async fn wait_for_budget(&self, prompt_tokens: usize) {
        loop {
            let wait = {
                let mut window = self.window.lock().expect("throttle window mutex poisoned");
                window.roll_if_expired();

                let would_breach_requests = self
                    .requests_per_minute
                    .is_some_and(|limit| window.requests + 1 > limit);
                let would_breach_tokens = self
                    .tokens_per_minute
                    .is_some_and(|limit| window.tokens as usize + prompt_tokens > limit as usize);

                if would_breach_requests || would_breach_tokens {
                    let remaining = Duration::from_secs(60).saturating_sub(window.started_at.elapsed());
                    Some(remaining)
                } else {
                    window.requests += 1;
                    window.tokens = window.tokens.saturating_add(prompt_tokens as u32);
                    None
                }
            };

            match wait {
                Some(remaining) if !remaining.is_zero() => tokio::time::sleep(remaining).await,
                Some(_) => continue,
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn semaphore_bounds_concurrency() {
        let throttle = ProviderThrottle::new(2, None, None);
        let _p1 = throttle.acquire().await;
        let _p2 = throttle.acquire().await;
        assert_eq!(throttle.semaphore.available_permits(), 0);
    }

    #[tokio::test]
    async fn unbounded_budget_never_waits() {
        let throttle = ProviderThrottle::new(5, None, None);
        let start = Instant::now();
        throttle.wait_for_budget(1_000_000).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn requests_per_minute_ceiling_is_tracked() {
        let throttle = ProviderThrottle::new(5, Some(1), None);
        throttle.wait_for_budget(0).await;
        let window = throttle.window.lock().unwrap();
        assert_eq!(window.requests, 1);
    }
}
