//! Cooperative cancellation via a wall-clock deadline.
//!
//! Long-running operations (ingestion, merge-candidate generation, a
//! retrieval plan with several store round-trips) check a `Deadline`
//! between suspension points rather than racing a timeout future. This is
//! time-based rather than flag-based: no caller has to remember to call
//! `cancel()`.

use crate::error::{EngineError, EngineResult};
use std::time::{Duration, Instant};

/// A point in time past which an operation should stop and report
/// [`EngineError::Canceled`] instead of continuing.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    /// A deadline that never expires, for callers with no timeout policy.
    pub fn never() -> Self {
        Self(Instant::now() + Duration::from_secs(60 * 60 * 24 * 365))
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Returns `Ok(())` if there is still time left, `Err(Canceled)` otherwise.
    /// Call this between steps of a multi-step operation.
    pub fn check(&self) -> EngineResult<()> {
        if self.is_expired() {
            Err(EngineError::Canceled)
        } else {
            Ok(())
        }
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_deadline_has_not_expired() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(!deadline.is_expired());
        assert!(deadline.check().is_ok());
    }

    #[test]
    fn zero_duration_deadline_is_immediately_expired() {
        let deadline = Deadline::after(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(deadline.is_expired());
        assert!(matches!(deadline.check(), Err(EngineError::Canceled)));
    }

    #[test]
    fn never_does_not_expire() {
        let deadline = Deadline::never();
        assert!(!deadline.is_expired());
    }
}
