//! Retry with bounded exponential backoff for single source requests

use std::time::Duration;

use crate::clock::Clock;
use crate::error::SourceError;

/// Backoff schedule: `base * 2^(retry-1)` (1s, 2s, 4s with the defaults).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

/// Retry a fallible request with exponential backoff.
///
/// Only retryable (transient) errors are retried; permanent and malformed
/// responses return immediately. Returns the final error on exhaustion.
pub fn retry_with_backoff<T>(
    label: &str,
    policy: &BackoffPolicy,
    clock: &dyn Clock,
    mut attempt_fn: impl FnMut() -> Result<T, SourceError>,
) -> Result<T, SourceError> {
    let mut retry = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if retry < policy.max_retries && e.is_retryable() => {
                retry += 1;
                let delay = policy.delay_for(retry);
                log::debug!(
                    "{label}: attempt {retry}/{} failed: {e}, retrying in {delay:?}",
                    policy.max_retries + 1
                );
                clock.sleep(delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    log::warn!("{label}: giving up after {} attempts: {e}", retry + 1);
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn transient() -> SourceError {
        SourceError::Transient {
            status: None,
            message: "connection reset".into(),
        }
    }

    #[test]
    fn backoff_exponential() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let clock = FakeClock::new();
        let mut calls = 0;
        let result = retry_with_backoff("test", &BackoffPolicy::default(), &clock, || {
            calls += 1;
            if calls < 3 { Err(transient()) } else { Ok(calls) }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[test]
    fn exhaustion_returns_last_error() {
        let clock = FakeClock::new();
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff("test", &BackoffPolicy::default(), &clock, || {
            calls += 1;
            Err(transient())
        });
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls, 4);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn permanent_error_not_retried() {
        let clock = FakeClock::new();
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff("test", &BackoffPolicy::default(), &clock, || {
            calls += 1;
            Err(SourceError::not_found("no match"))
        });
        assert!(result.unwrap_err().is_permanent());
        assert_eq!(calls, 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn malformed_not_retried() {
        let clock = FakeClock::new();
        let mut calls = 0;
        let _ = retry_with_backoff::<()>("test", &BackoffPolicy::default(), &clock, || {
            calls += 1;
            Err(SourceError::Malformed("bad json".into()))
        });
        assert_eq!(calls, 1);
    }
}
