//! Queue module: durable job store, snapshot media, and backoff policy.

mod medium;
mod retry;
mod snapshot;
mod store;

pub use medium::{JsonFileMedium, MediumLock, MemoryMedium, SnapshotMedium};
pub use retry::BackoffPolicy;
pub use snapshot::QueueSnapshot;
pub use store::{InMemoryStore, JsonFileStore, SnapshotStore};

use std::fmt;

use async_trait::async_trait;

use crate::domain::{JobId, JobRecord, JobState};
use crate::error::Result;
use crate::observability::QueueCounts;

/// The two containers a job can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    ActiveQueue,
    DeadLetter,
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Container::ActiveQueue => f.write_str("active queue"),
            Container::DeadLetter => f.write_str("dead-letter set"),
        }
    }
}

/// Job store port.
///
/// Design intent:
/// - The store is the single source of truth; workers never share job
///   state in memory, they coordinate only through these calls.
/// - Every mutating call is durable when it returns `Ok`.
/// - `update` and `move_to_dead` re-check the stored record, so a stale copy
///   (e.g. a job already claimed by another worker) is refused with
///   `InvalidTransition` instead of silently overwriting newer state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Append a new pending job to the active queue.
    async fn enqueue(&self, job: JobRecord) -> Result<()>;

    /// Consistent snapshot of active jobs in `state`, for handing to workers.
    async fn claim_next(&self, state: JobState) -> Result<Vec<JobRecord>>;

    /// Replace the active record with `job.id`.
    async fn update(&self, job: JobRecord) -> Result<()>;

    /// Atomically move the job from the active queue to the dead-letter set.
    /// Returns the record as stored there.
    async fn move_to_dead(&self, job: &JobRecord) -> Result<JobRecord>;

    /// Active jobs in `state`, in insertion order.
    async fn list_by_state(&self, state: JobState) -> Result<Vec<JobRecord>>;

    /// The dead-letter set, in insertion order.
    async fn list_dead(&self) -> Result<Vec<JobRecord>>;

    /// Move a dead job back to the active queue as pending with zero attempts.
    async fn revive(&self, id: JobId) -> Result<JobRecord>;

    /// Look a job up in either container.
    async fn get(&self, id: JobId) -> Result<Option<JobRecord>>;

    async fn counts(&self) -> Result<QueueCounts>;
}
