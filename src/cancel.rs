//! Cancellation token shared by every long-running operation (§5, §4.8).
//!
//! A new mutating request supersedes any in-flight one; the in-flight
//! request must observe cancellation at each yield point and return
//! `Cancelled` without altering state. This mirrors a timeout/cancellation
//! signal checked at well-defined boundaries rather than interrupting a
//! thread: a single `Arc<AtomicBool>` flipped by the Dispatcher, polled by
//! whichever component is mid-computation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Polled at each step/iteration/line boundary by components doing
/// long-running work (§5 suspension points).
#[derive(Debug, Clone)]
pub struct CancelToken {
    signal: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self { signal: Arc::new(AtomicBool::new(false)), deadline: None }
    }

    /// A token with a wall-clock deadline (§5: "exceeding a deadline is
    /// indistinguishable from cancellation to the caller").
    pub fn with_deadline(timeout: Duration) -> Self {
        Self { signal: Arc::new(AtomicBool::new(false)), deadline: Some(Instant::now() + timeout) }
    }

    /// Flips the signal; any component polling this token will observe
    /// cancellation at its next boundary.
    pub fn cancel(&self) {
        self.signal.store(true, Ordering::Relaxed);
    }

    /// Whether the token has been explicitly cancelled or its deadline has
    /// passed.
    pub fn is_cancelled(&self) -> bool {
        self.signal.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_observed() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn expired_deadline_counts_as_cancelled() {
        let token = CancelToken::with_deadline(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(token.is_cancelled());
    }
}
