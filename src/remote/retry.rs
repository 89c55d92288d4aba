//! Circuit breaker and retry policy for the Tally gateway.
//!
//! Transport failures are retried with exponential backoff; after enough
//! consecutive failures the breaker opens and requests fail fast until the
//! cool-down elapses. The first request after the cool-down runs half-open:
//! success closes the breaker, failure re-opens it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::remote_errors::{RemoteError, Result};

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_OPEN_SECS: u64 = 30;

#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen,
}

pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    failure_threshold: u32,
    open_for: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, Duration::from_secs(DEFAULT_OPEN_SECS))
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_for: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed { failures: 0 }),
            failure_threshold,
            open_for,
        }
    }

    /// Gate a request. Errors with [`RemoteError::CircuitOpen`] while the
    /// cool-down is running; transitions to half-open once it elapses.
    pub fn check(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let BreakerState::Open { until } = *state {
            let now = Instant::now();
            if now < until {
                return Err(RemoteError::CircuitOpen(
                    until.duration_since(now).as_secs().max(1),
                ));
            }
            *state = BreakerState::HalfOpen;
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        *state = BreakerState::Closed { failures: 0 };
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        match *state {
            BreakerState::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.failure_threshold {
                    *state = BreakerState::Open {
                        until: Instant::now() + self.open_for,
                    };
                } else {
                    *state = BreakerState::Closed { failures };
                }
            }
            // A half-open probe that fails re-opens immediately.
            BreakerState::HalfOpen => {
                *state = BreakerState::Open {
                    until: Instant::now() + self.open_for,
                };
            }
            BreakerState::Open { .. } => {}
        }
    }
}

/// Bounded exponential backoff for retryable transport errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (0-based). Doubles per attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_and_fails_fast() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(breaker.check().is_ok());
            breaker.record_failure();
        }
        assert!(matches!(breaker.check(), Err(RemoteError::CircuitOpen(_))));
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn half_open_after_cooldown_then_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        // Zero cool-down: the next check transitions straight to half-open.
        assert!(breaker.check().is_ok());
        breaker.record_success();
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.check().is_ok());
        breaker.record_failure();
        assert!(matches!(breaker.check(), Err(RemoteError::CircuitOpen(_))));
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }
}
