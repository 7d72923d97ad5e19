//! Process-wide request pacing.

use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::debug;

/// Enforces a minimum gap between the end of one request and the start of the
/// next. One instance is shared by everything that talks to the network; the
/// last-request instant is its only state and is mutated in one place.
///
/// Built on `tokio::time`, so tests can drive it with a paused clock.
pub struct RateLimiter {
    min_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_request: Mutex::new(None),
        }
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Wait until a request may start. The returned permit must be held for the
    /// duration of the request; dropping it stamps the end time.
    pub async fn acquire(&self) -> RatePermit<'_> {
        let guard = self.last_request.lock().await;
        if let Some(last) = *guard {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait = self.min_delay - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "Pacing request");
                tokio::time::sleep(wait).await;
            }
        }
        RatePermit { guard }
    }
}

/// Held while a request is in flight. Requests are serialized through it.
pub struct RatePermit<'a> {
    guard: MutexGuard<'a, Option<Instant>>,
}

impl Drop for RatePermit<'_> {
    fn drop(&mut self) {
        *self.guard = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_request_is_not_delayed() {
        let limiter = RateLimiter::new(Duration::from_secs(2));
        let start = Instant::now();
        let _p = limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_counts_from_end_of_previous_request() {
        let limiter = RateLimiter::new(Duration::from_secs(2));
        let start = Instant::now();
        for _ in 0..3 {
            let _p = limiter.acquire().await;
            // simulated request duration
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        // 3 x 500ms of work plus 2 gaps of 2s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(5500), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(5600), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_counts_toward_the_gap() {
        let limiter = RateLimiter::new(Duration::from_secs(2));
        drop(limiter.acquire().await);
        tokio::time::sleep(Duration::from_secs(5)).await;
        let before = Instant::now();
        let _p = limiter.acquire().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
