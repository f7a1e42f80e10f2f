//! Per-source request pacing.
//!
//! One limiter per source instance; it is the only shared mutable state a
//! source's workers touch. Acquisition is serialized by a mutex that is held
//! across the wait, so concurrent callers queue up rather than all waking at
//! once and bursting.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, system_clock};

/// Blocks callers until `1 / rate` has passed since the previous request.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Duration>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Limiter allowing `requests_per_second`; non-positive rates disable pacing.
    pub fn new(requests_per_second: f64, clock: Arc<dyn Clock>) -> Self {
        let min_interval = if requests_per_second > 0.0 && requests_per_second.is_finite() {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            min_interval,
            last_request: Mutex::new(None),
            clock,
        }
    }

    /// Limiter on the system clock.
    pub fn per_second(requests_per_second: f64) -> Self {
        Self::new(requests_per_second, system_clock())
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Wait `max(0, 1/rate - elapsed)` since the last request, then claim the slot.
    pub fn acquire(&self) {
        let mut last = self.last_request.lock().expect("rate limiter lock poisoned");
        if let Some(t) = *last {
            let elapsed = self.clock.now().saturating_sub(t);
            if elapsed < self.min_interval {
                self.clock.sleep(self.min_interval - elapsed);
            }
        }
        *last = Some(self.clock.now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn first_acquire_does_not_wait() {
        let clock = Arc::new(FakeClock::new());
        let limiter = RateLimiter::new(1.0, clock.clone());
        limiter.acquire();
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn n_acquires_take_at_least_n_minus_one_intervals() {
        let clock = Arc::new(FakeClock::new());
        let rate = 4.0;
        let limiter = RateLimiter::new(rate, clock.clone());
        let n = 9;
        let start = clock.now();
        for _ in 0..n {
            limiter.acquire();
        }
        let elapsed = clock.now() - start;
        assert!(elapsed >= Duration::from_secs_f64((n - 1) as f64 / rate));
    }

    #[test]
    fn waits_only_for_remaining_interval() {
        let clock = Arc::new(FakeClock::new());
        let limiter = RateLimiter::new(1.0, clock.clone());
        limiter.acquire();
        clock.advance(Duration::from_millis(400));
        limiter.acquire();
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(600)]);
    }

    #[test]
    fn no_wait_after_interval_elapsed() {
        let clock = Arc::new(FakeClock::new());
        let limiter = RateLimiter::new(2.0, clock.clone());
        limiter.acquire();
        clock.advance(Duration::from_secs(1));
        limiter.acquire();
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn zero_rate_disables_pacing() {
        let clock = Arc::new(FakeClock::new());
        let limiter = RateLimiter::new(0.0, clock.clone());
        for _ in 0..5 {
            limiter.acquire();
        }
        assert!(clock.sleeps().is_empty());
        assert_eq!(limiter.min_interval(), Duration::ZERO);
    }

    #[test]
    fn concurrent_acquires_are_serialized() {
        let limiter = Arc::new(RateLimiter::per_second(50.0)); // 20ms interval
        let start = std::time::Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.acquire())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
