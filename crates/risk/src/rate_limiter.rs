use std::collections::VecDeque;

/// Sliding-window token bucket: at most `max_events` admissions within any
/// rolling `window_ms` window. `max_events == 0` means unlimited, matching
/// the original's dataclass-based limiter.
#[derive(Debug, Clone)]
pub struct SlidingWindowRateLimiter {
    max_events: u32,
    window_ms: i64,
    events_ms: VecDeque<i64>,
}

impl SlidingWindowRateLimiter {
    pub fn new(max_events: u32, window_ms: i64) -> Self {
        SlidingWindowRateLimiter {
            max_events,
            window_ms,
            events_ms: VecDeque::new(),
        }
    }

    /// Evicts expired entries, then admits iff the bucket isn't full. A
    /// refused call leaves the bucket unmutated.
    pub fn try_acquire(&mut self, now_ms: i64) -> bool {
        if self.max_events == 0 {
            return true;
        }

        let cutoff = now_ms - self.window_ms;
        while let Some(&front) = self.events_ms.front() {
            if front <= cutoff {
                self.events_ms.pop_front();
            } else {
                break;
            }
        }

        if self.events_ms.len() as u32 >= self.max_events {
            return false;
        }

        self.events_ms.push_back(now_ms);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_rate_limit_third_call_refused_then_succeeds_after_window() {
        let mut limiter = SlidingWindowRateLimiter::new(2, 1000);
        assert!(limiter.try_acquire(0));
        assert!(limiter.try_acquire(100));
        assert!(!limiter.try_acquire(200));
        assert!(limiter.try_acquire(1001));
    }

    #[test]
    fn unlimited_when_max_events_is_zero() {
        let mut limiter = SlidingWindowRateLimiter::new(0, 1000);
        for i in 0..100 {
            assert!(limiter.try_acquire(i));
        }
    }

    #[test]
    fn refusal_does_not_mutate_the_window() {
        let mut limiter = SlidingWindowRateLimiter::new(1, 1000);
        assert!(limiter.try_acquire(0));
        assert!(!limiter.try_acquire(10));
        assert!(!limiter.try_acquire(20));
        assert!(limiter.try_acquire(1001));
    }
}
