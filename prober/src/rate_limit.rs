use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Rolling-window rate limiter: at most `limit` emissions within any window
/// of the configured length. The limit is passed per call so settings
/// changes take effect without rebuilding the worker.
pub struct RollingRateLimiter {
    window: Duration,
    emissions: Mutex<VecDeque<Instant>>,
}

impl RollingRateLimiter {
    pub fn per_minute() -> Self {
        Self::new(Duration::from_secs(60))
    }

    pub fn new(window: Duration) -> Self {
        Self {
            window,
            emissions: Mutex::new(VecDeque::new()),
        }
    }

    /// Waits until an emission is allowed, then records it.
    pub async fn acquire(&self, limit: u32) {
        loop {
            match self.try_emit(Instant::now(), limit) {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Records an emission at `now` if the window has room, otherwise
    /// returns how long until the earliest emission leaves the window.
    fn try_emit(&self, now: Instant, limit: u32) -> Result<(), Duration> {
        let mut emissions = self.emissions.lock().expect("rate limiter lock poisoned");
        while let Some(front) = emissions.front() {
            if now.duration_since(*front) >= self.window {
                emissions.pop_front();
            } else {
                break;
            }
        }
        if (emissions.len() as u32) < limit.max(1) {
            emissions.push_back(now);
            Ok(())
        } else {
            let front = *emissions.front().expect("non-empty at limit");
            Err((front + self.window).saturating_duration_since(now))
        }
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn allows_up_to_limit_in_one_window() {
        // given
        let limiter = RollingRateLimiter::new(secs(60));
        let start = Instant::now();
        // when, then
        for i in 0..30 {
            assert_that!(limiter.try_emit(start + secs(i), 30)).is_ok();
        }
        assert_that!(limiter.try_emit(start + secs(30), 30)).is_err();
    }

    #[test]
    fn blocks_until_earliest_emission_expires() {
        // given
        let limiter = RollingRateLimiter::new(secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.try_emit(start, 3).unwrap();
        }
        // when
        let wait = limiter.try_emit(start + secs(10), 3).unwrap_err();
        // then: the whole batch was emitted at t=0, room opens at t=60
        assert_that!(wait).is_equal_to(secs(50));
        assert_that!(limiter.try_emit(start + secs(60), 3)).is_ok();
    }

    #[test]
    fn window_keeps_rolling() {
        // given: 1/min, emissions at 0 and 61
        let limiter = RollingRateLimiter::new(secs(60));
        let start = Instant::now();
        limiter.try_emit(start, 1).unwrap();
        // when, then
        assert_that!(limiter.try_emit(start + secs(59), 1)).is_err();
        assert_that!(limiter.try_emit(start + secs(61), 1)).is_ok();
        assert_that!(limiter.try_emit(start + secs(62), 1)).is_err();
    }

    #[test]
    fn limit_reduction_applies_immediately() {
        // given: five emissions under a generous limit
        let limiter = RollingRateLimiter::new(secs(60));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.try_emit(start, 10).unwrap();
        }
        // when the setting drops to 3, then the window is already over limit
        assert_that!(limiter.try_emit(start + secs(1), 3)).is_err();
    }

    #[test]
    fn zero_limit_still_admits_one() {
        // a misconfigured limit of 0 must not deadlock the worker
        let limiter = RollingRateLimiter::new(secs(60));
        assert_that!(limiter.try_emit(Instant::now(), 0)).is_ok();
    }
}
