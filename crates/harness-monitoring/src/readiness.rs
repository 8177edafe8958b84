//! Bounded readiness polling.
//!
//! [`ReadinessPoller`] repeatedly invokes a [`ReadinessCheck`] until the check
//! reports ready, reports that the target crashed, or the timeout elapses.
//! A crash ends the wait immediately; anything else is retried every
//! `interval` until the deadline.
//!
//! ```rust
//! use std::time::Duration;
//! use harness_monitoring::{CheckOutcome, Readiness, ReadinessPoller};
//!
//! let poller = ReadinessPoller::new(Duration::from_secs(1), Duration::from_millis(10));
//! let mut attempts = 0;
//! let readiness = poller.poll(&mut |_budget: Duration| {
//!     attempts += 1;
//!     if attempts == 3 {
//!         CheckOutcome::Ready
//!     } else {
//!         CheckOutcome::pending("connection refused")
//!     }
//! });
//! assert!(matches!(readiness, Readiness::Ready { attempts: 3, .. }));
//! ```

use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

/// Default wait for a server to come up.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(120);

/// Default delay between attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Target is ready.
    Ready,
    /// Not ready yet; worth retrying.
    Pending(String),
    /// Target is gone; retrying is pointless.
    Crashed {
        exit_code: Option<i32>,
        detail: String,
    },
}

impl CheckOutcome {
    pub fn pending(reason: impl Into<String>) -> Self {
        Self::Pending(reason.into())
    }
}

/// Final result of a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready {
        elapsed: Duration,
        attempts: u32,
    },
    Crashed {
        exit_code: Option<i32>,
        detail: String,
        elapsed: Duration,
    },
    TimedOut {
        elapsed: Duration,
        attempts: u32,
        last_error: String,
    },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

/// Something that can be asked "are you up yet?".
///
/// `budget` is the time left before the poll deadline; a check should not
/// block much longer than that.
pub trait ReadinessCheck {
    fn attempt(&mut self, budget: Duration) -> CheckOutcome;
}

impl<F> ReadinessCheck for F
where
    F: FnMut(Duration) -> CheckOutcome,
{
    fn attempt(&mut self, budget: Duration) -> CheckOutcome {
        self(budget)
    }
}

/// Polls a check with a hard deadline. Holds no state between calls, so one
/// poller can be reused for any number of waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPoller {
    timeout: Duration,
    interval: Duration,
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        Self::new(DEFAULT_READINESS_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }
}

impl ReadinessPoller {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll until ready, crashed, or timed out.
    ///
    /// `TimedOut` is only returned once the deadline has passed, and each
    /// sleep is capped by the time remaining. Only the first attempt can be
    /// handed a zero budget, when the timeout itself is zero.
    pub fn poll<P: ReadinessCheck + ?Sized>(&self, check: &mut P) -> Readiness {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut attempts = 0u32;
        let mut last_error = String::from("no attempt made");

        loop {
            attempts += 1;
            let budget = deadline.saturating_duration_since(Instant::now());

            match check.attempt(budget) {
                CheckOutcome::Ready => {
                    let elapsed = start.elapsed();
                    debug!("Ready after {} attempt(s) in {:?}", attempts, elapsed);
                    return Readiness::Ready { elapsed, attempts };
                }
                CheckOutcome::Crashed { exit_code, detail } => {
                    let elapsed = start.elapsed();
                    debug!("Target crashed after {:?}: {}", elapsed, detail);
                    return Readiness::Crashed {
                        exit_code,
                        detail,
                        elapsed,
                    };
                }
                CheckOutcome::Pending(reason) => {
                    debug!("Not ready (attempt {}): {}", attempts, reason);
                    last_error = reason;
                }
            }

            let now = Instant::now();
            if now < deadline {
                thread::sleep(self.interval.min(deadline - now));
            }

            // A sleep capped at the deadline ends the loop here. Another
            // attempt would get a zero budget and replace the last real error.
            let now = Instant::now();
            if now >= deadline {
                return Readiness::TimedOut {
                    elapsed: now - start,
                    attempts,
                    last_error,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_on_first_attempt_does_not_sleep() {
        let poller = ReadinessPoller::new(Duration::from_secs(10), Duration::from_secs(5));
        let readiness = poller.poll(&mut |_: Duration| CheckOutcome::Ready);
        match readiness {
            Readiness::Ready { elapsed, attempts } => {
                assert_eq!(attempts, 1);
                assert!(elapsed < Duration::from_secs(1));
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_is_never_early() {
        let timeout = Duration::from_millis(300);
        let interval = Duration::from_millis(50);
        let poller = ReadinessPoller::new(timeout, interval);

        let readiness = poller.poll(&mut |_: Duration| CheckOutcome::pending("connection refused"));
        match readiness {
            Readiness::TimedOut {
                elapsed,
                attempts,
                last_error,
            } => {
                assert!(elapsed >= timeout, "timed out early: {:?}", elapsed);
                assert!(elapsed < timeout + interval * 4, "timed out late: {:?}", elapsed);
                assert!(attempts >= 2);
                assert_eq!(last_error, "connection refused");
            }
            other => panic!("expected TimedOut, got {:?}", other),
        }
    }

    #[test]
    fn test_crash_short_circuits() {
        let poller = ReadinessPoller::new(Duration::from_secs(30), Duration::from_millis(20));
        let mut attempts = 0;
        let readiness = poller.poll(&mut |_: Duration| {
            attempts += 1;
            if attempts < 3 {
                CheckOutcome::pending("connection refused")
            } else {
                CheckOutcome::Crashed {
                    exit_code: Some(3),
                    detail: "exit status: 3".to_string(),
                }
            }
        });

        match readiness {
            Readiness::Crashed {
                exit_code, elapsed, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(elapsed < Duration::from_secs(1));
            }
            other => panic!("expected Crashed, got {:?}", other),
        }
    }

    #[test]
    fn test_budget_shrinks_toward_deadline() {
        let timeout = Duration::from_millis(200);
        let poller = ReadinessPoller::new(timeout, Duration::from_millis(40));
        let mut budgets = Vec::new();
        poller.poll(&mut |budget: Duration| {
            budgets.push(budget);
            CheckOutcome::pending("not yet")
        });

        assert!(budgets.len() >= 2);
        assert!(budgets.iter().all(|b| *b <= timeout));
        assert!(budgets.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_last_error_survives_deadline() {
        // Interval longer than the timeout: the only sleep runs into the deadline.
        let poller = ReadinessPoller::new(Duration::from_millis(150), Duration::from_secs(1));
        let mut budgets = Vec::new();
        let readiness = poller.poll(&mut |budget: Duration| {
            budgets.push(budget);
            if budget.is_zero() {
                CheckOutcome::pending(format!("Timeout after {:?}", budget))
            } else {
                CheckOutcome::pending("HTTP 503")
            }
        });

        assert_eq!(budgets.len(), 1);
        assert!(budgets.iter().all(|b| !b.is_zero()));
        match readiness {
            Readiness::TimedOut {
                elapsed,
                attempts,
                last_error,
            } => {
                assert!(elapsed >= Duration::from_millis(150));
                assert_eq!(attempts, 1);
                assert_eq!(last_error, "HTTP 503");
            }
            other => panic!("expected TimedOut, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_timeout_attempts_once() {
        let poller = ReadinessPoller::new(Duration::ZERO, Duration::from_millis(10));
        let mut attempts = 0;
        let readiness = poller.poll(&mut |_: Duration| {
            attempts += 1;
            CheckOutcome::pending("connection refused")
        });
        assert_eq!(attempts, 1);
        assert!(matches!(readiness, Readiness::TimedOut { attempts: 1, .. }));
    }

    #[test]
    fn test_poller_is_reusable() {
        let poller = ReadinessPoller::new(Duration::from_millis(100), Duration::from_millis(10));
        for _ in 0..3 {
            assert!(poller.poll(&mut |_: Duration| CheckOutcome::Ready).is_ready());
        }
    }
}
