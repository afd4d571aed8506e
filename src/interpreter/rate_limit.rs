//! Token-bucket rate limiter shared by both engines.

use std::time::Instant;

/// Refills `rate` tokens per second up to `capacity`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            rate: rate.max(0.0),
            capacity: capacity.max(0.0),
            tokens: capacity.max(0.0),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take `cost` tokens if available.
    pub fn try_acquire(&mut self, cost: f64) -> bool {
        self.refill();
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_exhausted() {
        let mut bucket = TokenBucket::new(0.001, 3.0);
        assert!(bucket.try_acquire(1.0));
        assert!(bucket.try_acquire(1.0));
        assert!(bucket.try_acquire(1.0));
        assert!(!bucket.try_acquire(1.0));
    }

    #[test]
    fn test_cost_larger_than_capacity() {
        let mut bucket = TokenBucket::new(1000.0, 10.0);
        assert!(!bucket.try_acquire(11.0));
        assert!(bucket.try_acquire(10.0));
    }

    #[test]
    fn test_refill_over_time() {
        let mut bucket = TokenBucket::new(1000.0, 1.0);
        assert!(bucket.try_acquire(1.0));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(bucket.try_acquire(1.0));
    }
}
