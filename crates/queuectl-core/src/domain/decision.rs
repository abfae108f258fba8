//! Decision model: what happens to a job after a failed attempt.

use std::time::Duration;

/// The next action for a job whose latest attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Wait `delay`, then run the next attempt.
    Retry { delay: Duration },

    /// Retry budget exhausted; move the job to the dead-letter set.
    MarkDead,
}

impl Decision {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Decision::MarkDead)
    }
}
