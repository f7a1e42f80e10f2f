//! Time source for rate limiting and backoff.
//!
//! Production code uses [`SystemClock`]; tests use [`FakeClock`], whose
//! `sleep` advances virtual time instead of blocking.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic clock that can also sleep.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `Instant` and `thread::sleep`.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Shared system clock.
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock::default())
}

/// Virtual clock: `sleep` advances time instantly and is recorded.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().expect("clock lock poisoned") += by;
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("clock lock poisoned").clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        *self.now.lock().expect("clock lock poisoned")
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().expect("clock lock poisoned").push(duration);
        self.advance(duration);
    }
}
