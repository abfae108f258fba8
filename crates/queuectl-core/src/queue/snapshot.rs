//! Full queue snapshot and the read-modify-write operations over it.
//!
//! Every operation here is synchronous and pure over the in-memory document;
//! locking and persistence live in [`super::SnapshotStore`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::Container;
use crate::domain::{JobId, JobRecord, JobState};
use crate::error::{QueueError, Result};
use crate::observability::QueueCounts;

/// The whole persisted document: active queue plus dead-letter set.
///
/// Both collections keep insertion order across save/load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SnapshotRepr", into = "SnapshotRepr")]
pub struct QueueSnapshot {
    jobs: Vec<JobRecord>,
    dlq: Vec<JobRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SnapshotRepr {
    #[serde(default)]
    jobs: Vec<JobRecord>,
    #[serde(default)]
    dlq: Vec<JobRecord>,
}

impl TryFrom<SnapshotRepr> for QueueSnapshot {
    type Error = String;

    fn try_from(repr: SnapshotRepr) -> std::result::Result<Self, Self::Error> {
        if let Some(job) = repr.jobs.iter().find(|j| j.state().is_dead_letter()) {
            return Err(format!("job {} is dead but sits in the active queue", job.id()));
        }
        if let Some(job) = repr.dlq.iter().find(|j| !j.state().is_dead_letter()) {
            return Err(format!(
                "job {} is {} but sits in the dead-letter set",
                job.id(),
                job.state()
            ));
        }
        let mut seen = HashSet::with_capacity(repr.jobs.len() + repr.dlq.len());
        for job in repr.jobs.iter().chain(repr.dlq.iter()) {
            if !seen.insert(job.id()) {
                return Err(format!("job {} appears more than once", job.id()));
            }
        }
        Ok(Self {
            jobs: repr.jobs,
            dlq: repr.dlq,
        })
    }
}

impl From<QueueSnapshot> for SnapshotRepr {
    fn from(snapshot: QueueSnapshot) -> Self {
        Self {
            jobs: snapshot.jobs,
            dlq: snapshot.dlq,
        }
    }
}

impl QueueSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> &[JobRecord] {
        &self.jobs
    }

    pub fn dead_letters(&self) -> &[JobRecord] {
        &self.dlq
    }

    fn active_position(&self, id: JobId) -> Result<usize> {
        self.jobs
            .iter()
            .position(|j| j.id() == id)
            .ok_or(QueueError::NotFound {
                id,
                container: Container::ActiveQueue,
            })
    }

    fn dead_position(&self, id: JobId) -> Result<usize> {
        self.dlq
            .iter()
            .position(|j| j.id() == id)
            .ok_or(QueueError::NotFound {
                id,
                container: Container::DeadLetter,
            })
    }

    fn contains(&self, id: JobId) -> bool {
        self.jobs.iter().chain(self.dlq.iter()).any(|j| j.id() == id)
    }

    /// Append a new pending job to the active queue.
    pub fn enqueue(&mut self, job: JobRecord) -> Result<()> {
        job.validate().map_err(QueueError::InvalidJob)?;
        if job.state() != JobState::Pending || job.attempts() != 0 {
            return Err(QueueError::InvalidJob(format!(
                "job {} must enter the queue pending with no attempts (got {}, attempts={})",
                job.id(),
                job.state(),
                job.attempts()
            )));
        }
        if self.contains(job.id()) {
            return Err(QueueError::DuplicateJob(job.id()));
        }
        self.jobs.push(job);
        Ok(())
    }

    /// Replace the active record with the same id, if `job` is a legal successor.
    pub fn update(&mut self, job: JobRecord) -> Result<()> {
        let pos = self.active_position(job.id())?;
        let stored = &self.jobs[pos];
        if job.state().is_dead_letter() {
            // dead-lettering must go through move_to_dead
            return Err(QueueError::InvalidTransition {
                id: job.id(),
                from: stored.state(),
                to: job.state(),
            });
        }
        stored.check_successor(&job)?;
        job.validate().map_err(QueueError::InvalidJob)?;
        self.jobs[pos] = job;
        Ok(())
    }

    /// Remove the job from the active queue and append it, dead, to the DLQ.
    ///
    /// The submitted record must be failed with its budget spent (or already
    /// marked dead). The stored record may still be `processing` only for a
    /// zero budget, where the failing attempt cannot be persisted as `failed`.
    pub fn move_to_dead(&mut self, job: &JobRecord) -> Result<JobRecord> {
        let pos = self.active_position(job.id())?;
        let stored = &self.jobs[pos];
        if !matches!(stored.state(), JobState::Processing | JobState::Failed) {
            return Err(QueueError::InvalidTransition {
                id: job.id(),
                from: stored.state(),
                to: JobState::Dead,
            });
        }

        let mut dead = job.clone();
        if dead.state() != JobState::Dead {
            dead.mark_dead()?;
        }
        stored.check_immutable(&dead)?;
        if dead.attempts() < stored.attempts() {
            return Err(QueueError::InvalidTransition {
                id: job.id(),
                from: stored.state(),
                to: JobState::Dead,
            });
        }
        if stored.state() == JobState::Processing && dead.attempts() <= dead.max_retries() {
            // the last failed attempt has to be persisted before dead-lettering
            return Err(QueueError::InvalidTransition {
                id: job.id(),
                from: JobState::Processing,
                to: JobState::Dead,
            });
        }
        dead.validate().map_err(QueueError::InvalidJob)?;

        self.jobs.remove(pos);
        self.dlq.push(dead.clone());
        Ok(dead)
    }

    /// Move a dead job back to the active queue, pending with zero attempts.
    pub fn revive(&mut self, id: JobId) -> Result<JobRecord> {
        let pos = self.dead_position(id)?;
        let mut job = self.dlq[pos].clone();
        job.revive()?;

        self.dlq.remove(pos);
        self.jobs.push(job.clone());
        Ok(job)
    }

    pub fn list_by_state(&self, state: JobState) -> Vec<JobRecord> {
        self.jobs
            .iter()
            .filter(|j| j.state() == state)
            .cloned()
            .collect()
    }

    pub fn list_dead(&self) -> Vec<JobRecord> {
        self.dlq.clone()
    }

    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.jobs
            .iter()
            .chain(self.dlq.iter())
            .find(|j| j.id() == id)
            .cloned()
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for job in &self.jobs {
            match job.state() {
                JobState::Pending => counts.pending += 1,
                JobState::Processing => counts.processing += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
                JobState::Dead => {}
            }
        }
        counts.dead = self.dlq.len();
        counts
    }
}
