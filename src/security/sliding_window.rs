//! Sliding window log algorithm.
//!
//! Keeps the admission timestamps inside the trailing window. A request is
//! admitted while fewer than `limit` timestamps remain after pruning.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: u32,
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            timestamps: VecDeque::with_capacity(limit.min(1024) as usize),
        }
    }

    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    pub(crate) fn allow_at(&mut self, now: Instant) -> bool {
        self.prune(now);
        if self.timestamps.len() < self.limit as usize {
            self.timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    pub fn remaining(&mut self) -> u64 {
        self.remaining_at(Instant::now())
    }

    pub(crate) fn remaining_at(&mut self, now: Instant) -> u64 {
        self.prune(now);
        (self.limit as u64).saturating_sub(self.timestamps.len() as u64)
    }

    /// Time until the oldest counted request leaves the window; zero when
    /// capacity is already available.
    pub(crate) fn time_until_available_at(&mut self, now: Instant) -> Duration {
        self.prune(now);
        if self.timestamps.len() < self.limit as usize {
            return Duration::ZERO;
        }
        match self.timestamps.front() {
            Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
            None => self.window,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit as u64
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.timestamps.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_plus_one_rejected() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(5, Duration::from_secs(60));
        for i in 0..5 {
            assert!(window.allow_at(start + Duration::from_secs(i)));
        }
        assert!(!window.allow_at(start + Duration::from_secs(30)));
        assert_eq!(window.remaining_at(start + Duration::from_secs(30)), 0);
    }

    #[test]
    fn test_readmitted_when_oldest_leaves_window() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(2, Duration::from_secs(10));
        assert!(window.allow_at(start));
        assert!(window.allow_at(start + Duration::from_secs(4)));
        assert!(!window.allow_at(start + Duration::from_secs(9)));

        // The first request drops out at t=10, the second is still counted.
        assert!(window.allow_at(start + Duration::from_secs(10)));
        assert!(!window.allow_at(start + Duration::from_secs(11)));
    }

    #[test]
    fn test_time_until_available() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(1, Duration::from_secs(60));
        assert_eq!(window.time_until_available_at(start), Duration::ZERO);
        window.allow_at(start);
        assert_eq!(
            window.time_until_available_at(start + Duration::from_secs(15)),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn test_rejections_are_not_recorded() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(1, Duration::from_secs(10));
        assert!(window.allow_at(start));
        for s in 1..10 {
            assert!(!window.allow_at(start + Duration::from_secs(s)));
        }
        assert!(window.allow_at(start + Duration::from_secs(10)));
    }
}
