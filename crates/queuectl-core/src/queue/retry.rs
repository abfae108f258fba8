//! Backoff policy: decides what follows a failed attempt and how long to wait.

use std::time::Duration;

use crate::domain::{Decision, JobRecord};

/// Exponential backoff: `delay = base^attempts` time units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Integer base of the exponent. `0` and `1` give zero and constant delays.
    pub base: u32,

    /// Length of one time unit.
    pub unit: Duration,
}

impl BackoffPolicy {
    pub const DEFAULT_BASE: u32 = 2;

    pub fn new(base: u32, unit: Duration) -> Self {
        Self { base, unit }
    }

    /// Delay to wait after the attempt that brought the count to `attempts`.
    ///
    /// Example with base=2, unit=1s:
    /// - attempts 1: 2s
    /// - attempts 2: 4s
    /// - attempts 3: 8s
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let units = self.base.checked_pow(attempts).unwrap_or(u32::MAX);
        self.unit.saturating_mul(units)
    }

    /// Decide the next step for a job whose attempt count was just incremented.
    ///
    /// Pure: looks only at the record, never touches the store.
    pub fn decide(&self, job: &JobRecord) -> Decision {
        if job.is_exhausted() {
            Decision::MarkDead
        } else {
            Decision::Retry {
                delay: self.delay_for(job.attempts()),
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE, Duration::from_secs(1))
    }
}
