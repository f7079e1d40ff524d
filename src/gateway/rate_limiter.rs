//! Fixed-window request budget.

use std::time::Duration;

use tokio::time::Instant;

use crate::models::connector::RateLimit;

#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: RateLimit,
    window_start: Instant,
    used: u32,
}

impl FixedWindowLimiter {
    pub fn new(limit: RateLimit, now: Instant) -> Self {
        Self {
            limit,
            window_start: now,
            used: 0,
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Consumes one request from the current window, or returns the time
    /// left until the window rolls over.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        let elapsed = now.duration_since(self.window_start);
        if elapsed >= self.limit.window {
            self.window_start = now;
            self.used = 0;
        }

        if self.used >= self.limit.requests {
            return Err(self.limit.window.saturating_sub(elapsed));
        }
        self.used += 1;
        Ok(())
    }

    #[cfg(test)]
    pub fn remaining(&self, now: Instant) -> u32 {
        if now.duration_since(self.window_start) >= self.limit.window {
            return self.limit.requests;
        }
        self.limit.requests.saturating_sub(self.used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(requests: u32, window_secs: u64, now: Instant) -> FixedWindowLimiter {
        FixedWindowLimiter::new(
            RateLimit {
                requests,
                window: Duration::from_secs(window_secs),
            },
            now,
        )
    }

    #[test]
    fn test_budget_exhausts_within_window() {
        let now = Instant::now();
        let mut limiter = limiter(3, 60, now);

        for _ in 0..3 {
            assert!(limiter.try_acquire(now).is_ok());
        }
        assert_eq!(limiter.remaining(now), 0);
        let wait = limiter
            .try_acquire(now + Duration::from_secs(15))
            .unwrap_err();
        assert_eq!(wait, Duration::from_secs(45));
    }

    #[test]
    fn test_budget_resets_after_window() {
        let now = Instant::now();
        let mut limiter = limiter(1, 10, now);

        limiter.try_acquire(now).unwrap();
        assert!(limiter.try_acquire(now + Duration::from_secs(9)).is_err());
        assert!(limiter.try_acquire(now + Duration::from_secs(10)).is_ok());
        assert!(limiter.try_acquire(now + Duration::from_secs(11)).is_err());
    }

    #[test]
    fn test_rejections_do_not_consume_budget() {
        let now = Instant::now();
        let mut limiter = limiter(1, 10, now);

        limiter.try_acquire(now).unwrap();
        for _ in 0..5 {
            assert!(limiter.try_acquire(now).is_err());
        }
        assert_eq!(limiter.remaining(now + Duration::from_secs(10)), 1);
    }
}
