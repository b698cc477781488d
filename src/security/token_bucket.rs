//! Token bucket algorithm.
//!
//! Refill is lazy: elapsed time is converted to tokens on every check, no
//! background ticker. A request is admitted when a whole token is available.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self::new_at(capacity, refill_rate, Instant::now())
    }

    pub(crate) fn new_at(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_rate,
            last_refill: now,
        }
    }

    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    pub(crate) fn allow_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens available right now.
    pub fn remaining(&mut self) -> u64 {
        self.remaining_at(Instant::now())
    }

    pub(crate) fn remaining_at(&mut self, now: Instant) -> u64 {
        self.refill(now);
        self.tokens.max(0.0).floor() as u64
    }

    /// Time until the next whole token is available; zero if one already is.
    pub(crate) fn time_until_available_at(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if self.refill_rate <= 0.0 {
            return Duration::MAX;
        }
        // A vanishing rate overflows Duration; treat it as never.
        Duration::try_from_secs_f64((1.0 - self.tokens) / self.refill_rate)
            .unwrap_or(Duration::MAX)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Change capacity; stored tokens are capped to the new capacity.
    pub fn set_capacity(&mut self, capacity: u32) {
        self.capacity = capacity as f64;
        if self.tokens > self.capacity {
            self.tokens = self.capacity;
        }
    }

    pub(crate) fn set_refill_rate_at(&mut self, rate: f64, now: Instant) {
        // Settle tokens earned at the old rate first.
        self.refill(now);
        self.refill_rate = rate;
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let tokens_to_add = elapsed.as_secs_f64() * self.refill_rate;
        self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_capped_at_capacity() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new_at(10, 2.0, now);
        let admitted = (0..25).filter(|_| bucket.allow_at(now)).count();
        assert_eq!(admitted, 10);
        assert_eq!(bucket.remaining_at(now), 0);
    }

    #[test]
    fn test_full_again_after_capacity_over_rate() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(10, 2.0, start);
        for _ in 0..10 {
            assert!(bucket.allow_at(start));
        }
        assert!(!bucket.allow_at(start));

        // C / R = 5 seconds
        let later = start + Duration::from_secs(5);
        assert_eq!(bucket.remaining_at(later), 10);
    }

    #[test]
    fn test_partial_refill() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(4, 1.0, start);
        for _ in 0..4 {
            bucket.allow_at(start);
        }
        assert!(!bucket.allow_at(start + Duration::from_millis(500)));
        assert!(bucket.allow_at(start + Duration::from_millis(1000)));
        assert!(!bucket.allow_at(start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_time_until_available() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(1, 4.0, start);
        assert_eq!(bucket.time_until_available_at(start), Duration::ZERO);
        assert!(bucket.allow_at(start));
        let wait = bucket.time_until_available_at(start);
        assert_eq!(wait, Duration::from_millis(250));
    }

    #[test]
    fn test_tiny_rate_waits_forever_without_panicking() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(1, 1e-300, start);
        assert!(bucket.allow_at(start));
        assert_eq!(bucket.time_until_available_at(start), Duration::MAX);

        let mut stalled = TokenBucket::new_at(1, 0.0, start);
        stalled.allow_at(start);
        assert_eq!(stalled.time_until_available_at(start), Duration::MAX);
    }

    #[test]
    fn test_capacity_change() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new_at(10, 2.0, now);
        bucket.allow_at(now);
        bucket.set_capacity(3);
        assert_eq!(bucket.remaining_at(now), 3);
        bucket.set_capacity(15);
        assert_eq!(bucket.capacity(), 15);
    }

    #[test]
    fn test_rate_change_settles_old_rate_first() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(10, 1.0, start);
        for _ in 0..10 {
            bucket.allow_at(start);
        }
        bucket.set_refill_rate_at(0.5, start + Duration::from_secs(2));
        assert_eq!(bucket.remaining_at(start + Duration::from_secs(2)), 2);
        assert_eq!(bucket.remaining_at(start + Duration::from_secs(4)), 3);
        assert_eq!(bucket.refill_rate(), 0.5);
    }
}
