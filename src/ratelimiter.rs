//! Token-bucket rate limiter interposed before `on_emit` when throttling is
//! enabled.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A thread-safe token bucket of rate `R` tokens/second with burst `2R`.
/// When the bucket is empty, [`RateLimiter::try_acquire`] returns `false`
/// immediately rather than waiting; the caller is expected to treat that as
/// [`crate::error::PipelineError::Throttled`].
pub struct RateLimiter {
    inner: Mutex<Bucket>,
    rate_per_sec: f64,
    capacity: f64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// `burst_multiplier` defaults to 2.0 (burst = 2R); callers may override
    /// it, since the exact multiplier is left configurable (see DESIGN.md).
    pub fn new(rate_per_sec: f64, burst_multiplier: f64) -> Self {
        let capacity = rate_per_sec * burst_multiplier;
        RateLimiter {
            inner: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            rate_per_sec,
            capacity,
        }
    }

    pub fn with_default_burst(rate_per_sec: f64) -> Self {
        Self::new(rate_per_sec, 2.0)
    }

    /// Attempts to take one token. Never blocks.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.inner.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_burst_up_to_2x_rate() {
        let limiter = RateLimiter::with_default_burst(10.0);
        let mut allowed = 0;
        for _ in 0..25 {
            if limiter.try_acquire() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 20, "burst capacity should be exactly 2x rate");
    }

    #[test]
    fn refuses_once_bucket_is_drained() {
        let limiter = RateLimiter::with_default_burst(1.0);
        for _ in 0..2 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn refills_over_time() {
        let limiter = RateLimiter::new(1000.0, 1.0);
        for _ in 0..1000 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        std::thread::sleep(Duration::from_millis(50));
        assert!(limiter.try_acquire());
    }
}
