//! A hand-rolled token bucket for the ingest surface. Not worth pulling in
//! `governor` for a single-bucket, per-process limiter.

use parking_lot::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: f64,
    rate_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: u32) -> Self {
        let capacity = rate_per_sec as f64;
        Self {
            capacity,
            rate_per_sec: capacity,
            bucket: Mutex::new(Bucket { tokens: capacity, last_refill: Instant::now() }),
        }
    }

    /// Refills by elapsed time, then takes one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
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
    fn allows_bursts_up_to_capacity() {
        let limiter = RateLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn refills_over_time() {
        let limiter = RateLimiter::new(1000);
        for _ in 0..1000 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(limiter.try_acquire());
    }
}
