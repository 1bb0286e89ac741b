//! Process-local circuit breaker guarding calls to the remote authority.
//!
//! The breaker is a single atomic counter of consecutive failures. It is OPEN
//! while the counter is at or above the threshold and CLOSED otherwise. There
//! is no half-open probe and no time based recovery: it only closes again after
//! a successful call or an explicit administrative reset.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{AuthzError, Result};

/// Default number of consecutive failures that opens the breaker.
pub const DEFAULT_THRESHOLD: u32 = 5;

/// Derived breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerState {
    Closed,
    Open,
}

/// Consecutive-failure circuit breaker.
///
/// Shared by `Arc` between the gateway and the authorization client. All
/// operations are lock free.
#[derive(Debug)]
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    threshold: u32,
}

impl CircuitBreaker {
    /// Create a closed breaker with the given threshold.
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            threshold,
        }
    }

    /// True while fewer than `threshold` consecutive failures have been recorded.
    pub fn allow_call(&self) -> bool {
        self.current_failure_count() < self.threshold
    }

    /// `Err(CircuitOpen)` when no remote call may be made.
    pub fn ensure_closed(&self) -> Result<()> {
        if self.allow_call() {
            Ok(())
        } else {
            Err(AuthzError::CircuitOpen)
        }
    }

    /// Record a successful remote call, closing the breaker.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Record a failed remote call. Returns the new failure count.
    pub fn record_failure(&self) -> u32 {
        let previous = self
            .consecutive_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_add(1))
            })
            .unwrap_or(u32::MAX);
        previous.saturating_add(1)
    }

    /// Administrative reset. Same effect as a success.
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    pub fn current_failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state(&self) -> BreakerState {
        if self.allow_call() {
            BreakerState::Closed
        } else {
            BreakerState::Open
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_breaker_is_closed() {
        let breaker = CircuitBreaker::default();
        assert!(breaker.allow_call());
        assert_eq!(breaker.current_failure_count(), 0);
        assert_eq!(breaker.threshold(), 5);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_opens_after_exactly_threshold_failures() {
        let breaker = CircuitBreaker::new(5);

        for i in 1..5 {
            assert_eq!(breaker.record_failure(), i);
            assert!(breaker.allow_call(), "should still be closed after {i}");
        }

        assert_eq!(breaker.record_failure(), 5);
        assert!(!breaker.allow_call());
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_ensure_closed_reports_open_breaker() {
        let breaker = CircuitBreaker::new(2);
        assert_eq!(breaker.ensure_closed(), Ok(()));

        breaker.record_failure();
        breaker.record_failure();
        let err = breaker.ensure_closed().unwrap_err();
        assert_eq!(err, AuthzError::CircuitOpen);
        assert_eq!(err.kind(), "circuit_open");

        breaker.reset();
        assert!(breaker.ensure_closed().is_ok());
    }

    #[test]
    fn test_success_closes_and_zeroes() {
        let breaker = CircuitBreaker::new(3);
        for _ in 0..7 {
            breaker.record_failure();
        }
        assert!(!breaker.allow_call());

        breaker.record_success();
        assert!(breaker.allow_call());
        assert_eq!(breaker.current_failure_count(), 0);
    }

    #[test]
    fn test_reset_closes_and_zeroes() {
        let breaker = CircuitBreaker::new(2);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.current_failure_count(), 0);
    }

    #[test]
    fn test_success_mid_streak_restarts_count() {
        let breaker = CircuitBreaker::new(5);
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert!(breaker.allow_call());
        assert_eq!(breaker.current_failure_count(), 4);
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let breaker = Arc::new(CircuitBreaker::new(5));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breaker = breaker.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        breaker.record_failure();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(breaker.current_failure_count(), 8000);
    }
}
