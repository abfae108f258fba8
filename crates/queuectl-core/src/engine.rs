//! Retry engine: drives one job to `completed` or `dead`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::domain::{Decision, JobId, JobRecord};
use crate::error::Result;
use crate::executor::CommandExecutor;
use crate::queue::{BackoffPolicy, JobStore};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Dead,
    /// Stop was requested between attempts; the job is persisted as `failed`.
    Interrupted,
}

/// Report of one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRun {
    pub job_id: JobId,
    pub disposition: Disposition,
    /// The job's attempt count when the run ended.
    pub attempts: u32,
    /// Commands executed during this run.
    pub executions: u32,
    /// Backoff delays slept, in order.
    pub delays: Vec<Duration>,
    pub last_failure: Option<String>,
}

impl JobRun {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            disposition: Disposition::Interrupted,
            attempts: 0,
            executions: 0,
            delays: Vec::new(),
            last_failure: None,
        }
    }

    fn finish(mut self, disposition: Disposition, job: &JobRecord) -> Self {
        self.disposition = disposition;
        self.attempts = job.attempts();
        self
    }
}

/// Runs the attempt loop for a single job.
///
/// Flow per attempt:
/// 1. mark `processing`, persist
/// 2. execute the command
/// 3. success: mark `completed`, persist, done
/// 4. failure: count the attempt, mark `failed`, persist, then either
///    dead-letter (budget spent) or sleep the backoff and go again
///
/// Every transition is persisted before the next step starts. A store error
/// ends the run immediately and the in-memory record is dropped, so memory
/// never runs ahead of what is durable.
pub struct RetryEngine {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn CommandExecutor>,
    policy: BackoffPolicy,
}

impl RetryEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn CommandExecutor>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            executor,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Run `job` to a terminal state, ignoring shutdown.
    pub async fn run_to_end(&self, job: JobRecord) -> Result<JobRun> {
        let (_tx, stop) = watch::channel(false);
        self.run(job, &stop).await
    }

    /// Run `job`, checking `stop` after each backoff sleep.
    #[tracing::instrument(name = "job", skip_all, fields(job_id = %job.id()))]
    pub async fn run(&self, mut job: JobRecord, stop: &watch::Receiver<bool>) -> Result<JobRun> {
        let mut run = JobRun::new(job.id());

        loop {
            job.mark_processing()?;
            self.store.update(job.clone()).await?;
            tracing::info!(
                attempt = job.attempts() + 1,
                max_retries = job.max_retries(),
                command = job.command(),
                "processing job"
            );

            let outcome = self.executor.execute(job.command()).await;
            run.executions += 1;

            if outcome.success {
                job.mark_completed()?;
                self.store.update(job.clone()).await?;
                tracing::info!(attempts = job.attempts(), "job completed");
                return Ok(run.finish(Disposition::Completed, &job));
            }

            job.record_failure()?;
            // a zero budget cannot hold a failed attempt; it goes straight to the DLQ
            if job.attempts() <= job.max_retries() {
                self.store.update(job.clone()).await?;
            }
            run.last_failure = Some(outcome.detail);

            match self.policy.decide(&job) {
                Decision::MarkDead => {
                    let dead = self.store.move_to_dead(&job).await?;
                    tracing::warn!(
                        attempts = dead.attempts(),
                        reason = run.last_failure.as_deref().unwrap_or_default(),
                        "retries exhausted, moved to dead-letter set"
                    );
                    return Ok(run.finish(Disposition::Dead, &dead));
                }
                Decision::Retry { delay } => {
                    tracing::warn!(
                        attempts = job.attempts(),
                        max_retries = job.max_retries(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        reason = run.last_failure.as_deref().unwrap_or_default(),
                        "job failed, backing off"
                    );
                    run.delays.push(delay);
                    tokio::time::sleep(delay).await;

                    if *stop.borrow() {
                        tracing::info!(attempts = job.attempts(), "stop requested, leaving job failed");
                        return Ok(run.finish(Disposition::Interrupted, &job));
                    }
                }
            }
        }
    }
}
