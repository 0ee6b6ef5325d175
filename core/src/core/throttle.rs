/// Lock-free rate-limit throttle, one per upstream provider.
///
/// Watches response codes and backs off exponentially whenever the provider
/// answers 429. A `Retry-After` hint from the provider overrides the computed
/// delay. Uses atomics exclusively so concurrent requests never contend.
///
/// Backoff: 0 → 250 → 500 → 1000 → ... → 30000ms cap.
/// Decay: -250ms per successful response, floors at 0.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering::Relaxed};

use rand::Rng;
use tokio::time::{sleep, Duration};

const MAX_DELAY_MS: u64 = 30_000;
const INITIAL_BACKOFF_MS: u64 = 250;
const DECAY_MS: u64 = 250;

pub struct ThrottleController {
    delay_ms: AtomicU64,
    consecutive_limits: AtomicU32,
    total_limited: AtomicU64,
}

impl Default for ThrottleController {
    fn default() -> Self {
        Self::new()
    }
}

impl ThrottleController {
    pub fn new() -> Self {
        Self {
            delay_ms: AtomicU64::new(0),
            consecutive_limits: AtomicU32::new(0),
            total_limited: AtomicU64::new(0),
        }
    }

    /// Sleeps for the current delay plus up to 10% jitter. No-op when delay is 0.
    pub async fn wait(&self) {
        let ms = self.delay_ms.load(Relaxed);
        if ms > 0 {
            let jitter = rand::rng().random_range(0..=ms / 10);
            sleep(Duration::from_millis(ms + jitter)).await;
        }
    }

    /// Adjusts the delay from a response status.
    /// Returns true if this response escalated the backoff.
    pub fn record_response(&self, status: u16, retry_after_secs: Option<u64>) -> bool {
        if status == 429 {
            let hits = self.consecutive_limits.fetch_add(1, Relaxed) + 1;
            self.total_limited.fetch_add(1, Relaxed);

            // 250 * 2^(hits-1), capped
            let computed = INITIAL_BACKOFF_MS * (1u64 << (hits - 1).min(7));
            let hinted = retry_after_secs.map(|s| s.saturating_mul(1000)).unwrap_or(0);
            let new_delay = computed.max(hinted).min(MAX_DELAY_MS);
            self.delay_ms.store(new_delay, Relaxed);
            true
        } else {
            self.consecutive_limits.store(0, Relaxed);

            let current = self.delay_ms.load(Relaxed);
            if current > 0 {
                self.delay_ms.store(current.saturating_sub(DECAY_MS), Relaxed);
            }
            false
        }
    }

    pub fn current_delay_ms(&self) -> u64 {
        self.delay_ms.load(Relaxed)
    }

    pub fn total_limited(&self) -> u64 {
        self.total_limited.load(Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_escalates_and_caps() {
        let throttle = ThrottleController::new();
        assert!(throttle.record_response(429, None));
        assert_eq!(throttle.current_delay_ms(), 250);
        throttle.record_response(429, None);
        assert_eq!(throttle.current_delay_ms(), 500);
        for _ in 0..20 {
            throttle.record_response(429, None);
        }
        assert_eq!(throttle.current_delay_ms(), MAX_DELAY_MS);
        assert_eq!(throttle.total_limited(), 22);
    }

    #[test]
    fn test_retry_after_overrides_computed_delay() {
        let throttle = ThrottleController::new();
        throttle.record_response(429, Some(5));
        assert_eq!(throttle.current_delay_ms(), 5_000);

        throttle.record_response(429, Some(3_600));
        assert_eq!(throttle.current_delay_ms(), MAX_DELAY_MS);
    }

    #[test]
    fn test_success_decays_delay() {
        let throttle = ThrottleController::new();
        throttle.record_response(429, None);
        throttle.record_response(429, None);
        assert!(!throttle.record_response(200, None));
        assert_eq!(throttle.current_delay_ms(), 250);
        throttle.record_response(200, None);
        throttle.record_response(200, None);
        assert_eq!(throttle.current_delay_ms(), 0);
    }

    #[tokio::test]
    async fn test_wait_is_noop_without_delay() {
        let throttle = ThrottleController::new();
        let start = std::time::Instant::now();
        throttle.wait().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
