//! Job record: the unit of work and its lifecycle methods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::state::JobState;
use crate::error::{QueueError, Result};

/// A job as stored in the queue.
///
/// Design:
/// - Fields are read through accessors; state changes go through the
///   transition methods below so every change is checked against the state
///   machine and refreshes `updated_at`.
/// - Persisted as a flat record (see [`JobRecordRepr`]) and rebuilt through a
///   validating `TryFrom`, so a malformed document is rejected on load
///   instead of producing a record that breaks the invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "JobRecordRepr", into = "JobRecordRepr")]
pub struct JobRecord {
    id: JobId,
    command: String,
    state: JobState,
    attempts: u32,
    max_retries: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Wire shape of a job: one flat mapping of its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobRecordRepr {
    pub id: JobId,
    pub command: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A fresh pending job with zero attempts.
    pub fn new(command: impl Into<String>, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            command: command.into(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Has the retry budget been used up?
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_retries
    }

    /// Start an attempt (`pending|failed -> processing`).
    ///
    /// A failed job may only be re-claimed while budget remains.
    pub(crate) fn mark_processing(&mut self) -> Result<()> {
        if self.state == JobState::Failed && self.is_exhausted() {
            return Err(self.invalid(JobState::Processing));
        }
        self.transition(JobState::Processing)
    }

    /// `processing -> completed`.
    pub(crate) fn mark_completed(&mut self) -> Result<()> {
        self.transition(JobState::Completed)
    }

    /// `processing -> failed`, counting the attempt.
    pub(crate) fn record_failure(&mut self) -> Result<()> {
        self.transition(JobState::Failed)?;
        self.attempts = self.attempts.saturating_add(1);
        Ok(())
    }

    /// `failed -> dead`. Only an exhausted job may be dead-lettered.
    pub(crate) fn mark_dead(&mut self) -> Result<()> {
        if !self.is_exhausted() {
            return Err(self.invalid(JobState::Dead));
        }
        self.transition(JobState::Dead)
    }

    /// `dead -> pending` with a fresh retry budget.
    pub(crate) fn revive(&mut self) -> Result<()> {
        self.transition(JobState::Pending)?;
        self.attempts = 0;
        Ok(())
    }

    fn transition(&mut self, to: JobState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(self.invalid(to));
        }
        self.state = to;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        // never earlier than created_at, even if the wall clock steps back
        self.updated_at = Utc::now().max(self.created_at);
    }

    fn invalid(&self, to: JobState) -> QueueError {
        QueueError::InvalidTransition {
            id: self.id,
            from: self.state,
            to,
        }
    }

    /// Check that `next` is a legal replacement for `self` as stored.
    ///
    /// Used by the store's `update`: the state change must be an edge of the
    /// state machine, attempts may not go backwards, and the fields fixed at
    /// enqueue time must be untouched.
    pub(crate) fn check_successor(&self, next: &JobRecord) -> Result<()> {
        self.check_immutable(next)?;
        if !self.state.can_transition_to(next.state) || next.attempts < self.attempts {
            return Err(self.invalid(next.state));
        }
        Ok(())
    }

    pub(crate) fn check_immutable(&self, next: &JobRecord) -> Result<()> {
        if next.command != self.command {
            return Err(self.immutable("command"));
        }
        if next.max_retries != self.max_retries {
            return Err(self.immutable("max_retries"));
        }
        if next.created_at != self.created_at {
            return Err(self.immutable("created_at"));
        }
        Ok(())
    }

    fn immutable(&self, field: &'static str) -> QueueError {
        QueueError::ImmutableField { id: self.id, field }
    }

    /// Record-level invariants, shared by `TryFrom` and the store.
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if self.command.trim().is_empty() {
            return Err("command is empty".to_string());
        }
        if self.updated_at < self.created_at {
            return Err("updated_at precedes created_at".to_string());
        }
        match self.state {
            JobState::Dead => {
                if !self.is_exhausted() {
                    return Err(format!(
                        "dead with budget left ({}/{})",
                        self.attempts, self.max_retries
                    ));
                }
            }
            _ => {
                if self.attempts > self.max_retries {
                    return Err(format!(
                        "{} with attempts {} above max_retries {}",
                        self.state, self.attempts, self.max_retries
                    ));
                }
            }
        }
        Ok(())
    }
}

impl TryFrom<JobRecordRepr> for JobRecord {
    type Error = String;

    fn try_from(repr: JobRecordRepr) -> std::result::Result<Self, Self::Error> {
        let record = JobRecord {
            id: repr.id,
            command: repr.command,
            state: repr.state,
            attempts: repr.attempts,
            max_retries: repr.max_retries,
            created_at: repr.created_at,
            updated_at: repr.updated_at,
        };
        record
            .validate()
            .map_err(|reason| format!("job {}: {reason}", record.id))?;
        Ok(record)
    }
}

impl From<JobRecord> for JobRecordRepr {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id,
            command: record.command,
            state: record.state,
            attempts: record.attempts,
            max_retries: record.max_retries,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
